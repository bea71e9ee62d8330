//! Integration Tests Module
//!
//! End-to-end tests for the question-to-answer pipeline against an in-memory
//! Chinook database and scripted LLM providers. Tests cover the stage state
//! machine and correction loop, the shared gateway (rate limiting, budgets,
//! key rotation and fallback), the live schema graph with the guards, and
//! configuration loading.

// Scripted provider and database fixtures
mod support;

// Pipeline stage flow, corrections and terminal statuses
mod pipeline_test;

// Gateway state shared across queries
mod gateway_test;

// Schema graph and guards over a live catalog
mod schema_graph_test;

// Config file loading and provider chain construction
mod config_test;
