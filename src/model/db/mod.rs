pub mod audit;
pub mod candidate;
pub mod election;
pub mod vote;
