mod processor;
pub use processor::PruningProcessor;

#[cfg(test)]
mod tests;
