pub mod flow;
pub mod handle_requests;
