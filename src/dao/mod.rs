/// Serializable records exchanged with the collaborators.
pub mod models;
/// Shelter/POI reference data pull interface.
pub mod reference;
/// Storage error types shared by transition stores.
pub mod storage;
/// Durable recording of session transitions.
pub mod transition_store;
