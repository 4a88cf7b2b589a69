pub mod flow_context;
pub mod flow_trait;
pub mod flowcontext;
pub mod v5;
