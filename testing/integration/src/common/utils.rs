use std::time::Duration;

/// Polls `success` every `sleep_millis`, panicking with `panic_message` once `max_iterations` polls failed
pub async fn wait_for(sleep_millis: u64, max_iterations: u64, success: impl Fn() -> bool, panic_message: &'static str) {
    let mut i: u64 = 0;
    loop {
        i += 1;
        tokio::time::sleep(Duration::from_millis(sleep_millis)).await;
        if success() {
            break;
        } else if i >= max_iterations {
            panic!("{}", panic_message);
        }
    }
}
