//! `hippo-runtime` – Process plumbing around the memory engine.
//!
//! # Modules
//!
//! - [`llm_driver`] – [`LlmDriver`][llm_driver::LlmDriver]:
//!   an async client for OpenAI-compatible chat-completion servers such as
//!   [Ollama](https://ollama.com) (`http://localhost:11434`).  It provides the
//!   engine's topic-extraction and summarization capabilities.
//! - [`scheduler`] – [`spawn_scheduler`][scheduler::spawn_scheduler]:
//!   periodic build, forget and merge jobs with cooperative shutdown.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]:
//!   initialises the global `tracing` subscriber with an optional OTLP span
//!   exporter.  Set `OTEL_EXPORTER_OTLP_ENDPOINT` to enable live trace export
//!   to Jaeger, Grafana Tempo, or any OTLP-compatible collector.

pub mod llm_driver;
pub mod scheduler;
pub mod telemetry;

pub use llm_driver::{LlmDriver, LlmError};
pub use scheduler::{Job, MaintenanceSchedule, SchedulerHandle, spawn_scheduler};
