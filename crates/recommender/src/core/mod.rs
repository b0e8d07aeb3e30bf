pub mod assembler;
pub mod audit_log;
pub mod conflict;
pub mod engine;
pub mod feedback;
pub mod fusion;
pub mod hub;
pub mod outcome_monitor;
pub mod position_sizing;
pub mod uncertainty;
