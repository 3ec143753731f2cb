mod config;
mod execution;
mod pipeline;
