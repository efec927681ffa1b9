mod common;
mod queries;
mod samples;
mod simulation;
