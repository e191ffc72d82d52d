// medflow-orders/src/services/mod.rs

//! Collaborators the pipelines call out to.

pub mod object_store;
pub mod payment_proof;
pub mod shipping;
