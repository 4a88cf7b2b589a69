pub mod reachability;
