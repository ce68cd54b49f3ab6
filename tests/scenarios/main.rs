//! Scenario tests: whole workflows driven through the engine with scripted commands

mod helpers;

mod job_graph;
mod python_package;
mod runner_labels;
mod triggers;
