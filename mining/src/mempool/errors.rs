pub use kestrel_mining_errors::mempool::{NonStandardError, NonStandardResult, RejectCode, RuleError, RuleResult};
