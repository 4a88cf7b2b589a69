pub mod mergeset;
pub mod ordering;
pub mod protocol;
