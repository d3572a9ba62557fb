pub mod bland;
pub mod classifier;
pub mod mock_telephony;
pub mod orchestrator;
pub mod queue;
pub mod repository;
pub mod telephony;
pub mod workflow;
