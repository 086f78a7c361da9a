//! Settlement worker: wires configuration, collaborators and the job
//! executor into one runnable process.

pub mod app;
