mod processor;
mod template;
mod utxo_validation;
pub use processor::VirtualStateProcessor;
#[cfg(test)]
mod tests;
