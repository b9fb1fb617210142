mod helpers;
mod orchestrator;
mod rebuild;
