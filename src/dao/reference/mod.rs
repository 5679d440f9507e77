mod json;

pub use json::JsonReferenceData;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::{
    sequencer::{Poi, Question, QuestionCategory},
    session::Shelter,
};

/// Failures of the shelter/POI reference collaborator.
#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("reference data unavailable: {0}")]
    Unavailable(String),
    #[error("malformed reference data: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Read-only pull interface onto shelter and question reference data.
pub trait ReferenceData: Send + Sync {
    /// Shelter with its surrounding POIs, or `None` when the code is unknown.
    fn shelter_by_code(&self, code: &str) -> BoxFuture<'static, Result<Option<Shelter>, ReferenceError>>;

    /// Questions about `pois`, restricted to `categories` (empty means all).
    fn questions_for(
        &self,
        pois: &[Poi],
        categories: &[QuestionCategory],
    ) -> BoxFuture<'static, Result<Vec<Question>, ReferenceError>>;
}
