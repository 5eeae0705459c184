// src/exec/mod.rs

//! Engine client layer.
//!
//! - [`backend`] defines the [`EngineClient`] contract every backend adapter
//!   implements, plus [`QueryResult`] and [`ClientCapabilities`].
//! - [`script`] is the synchronous in-process variant.
//! - [`command`] submits the query as a shell job and polls it.
//! - [`statement`] talks to a Trino/Presto coordinator over HTTP.
//! - [`factory`] maps `(language, executor)` pairs to client constructors and
//!   describes the parameters each executor kind accepts.

pub mod backend;
pub mod command;
pub mod factory;
pub mod script;
pub mod statement;

pub use backend::{BoxFuture, ClientCapabilities, EngineClient, QueryResult};
pub use factory::{
    ExecutorParams, ExecutorRegistry, ExecutorSpec, FieldType, FlattenedExecutorTemplate,
    TemplateField,
};
