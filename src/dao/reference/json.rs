use std::{collections::HashSet, fs, path::Path, sync::Arc};

use futures::future::BoxFuture;
use tracing::info;

use crate::{
    dao::{
        models::{ReferenceFileEntity, ShelterEntity},
        reference::{ReferenceData, ReferenceError},
    },
    state::{
        geofence::Coordinate,
        sequencer::{Poi, Question, QuestionCategory, questions_from_facts},
        session::Shelter,
    },
};

/// Reference data loaded once from a JSON file.
///
/// Curated questions take precedence; POI facts fill in questions for anything the curated
/// bank does not cover.
#[derive(Clone)]
pub struct JsonReferenceData {
    inner: Arc<ReferenceFileEntity>,
}

impl JsonReferenceData {
    /// Read and parse the reference file at `path`.
    pub fn from_path(path: &Path) -> Result<Self, ReferenceError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            ReferenceError::Unavailable(format!("cannot read {}: {err}", path.display()))
        })?;
        let data = Self::from_json(&contents)?;
        info!(
            path = %path.display(),
            shelters = data.inner.shelters.len(),
            questions = data.inner.questions.len(),
            "loaded reference data"
        );
        Ok(data)
    }

    /// Parse reference data from a JSON document.
    pub fn from_json(contents: &str) -> Result<Self, ReferenceError> {
        let file: ReferenceFileEntity = serde_json::from_str(contents)?;
        Ok(Self {
            inner: Arc::new(file),
        })
    }

    /// Empty data set; every lookup misses.
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(ReferenceFileEntity::default()),
        }
    }

    fn find_shelter(&self, code: &str) -> Option<Shelter> {
        self.inner
            .shelters
            .iter()
            .find(|shelter| shelter.code.eq_ignore_ascii_case(code))
            .map(to_shelter)
    }

    fn collect_questions(&self, pois: &[Poi], categories: &[QuestionCategory]) -> Vec<Question> {
        let poi_ids: HashSet<&str> = pois.iter().map(|poi| poi.id.as_str()).collect();
        let wanted = |category: QuestionCategory| categories.is_empty() || categories.contains(&category);

        let mut questions: Vec<Question> = self
            .inner
            .questions
            .iter()
            .filter(|question| poi_ids.contains(question.poi_id.as_str()) && wanted(question.category))
            .cloned()
            .map(Question::from)
            .collect();

        let covered: HashSet<(String, QuestionCategory)> = questions
            .iter()
            .map(|question| (question.poi_id.clone(), question.category))
            .collect();
        questions.extend(
            questions_from_facts(pois, categories)
                .into_iter()
                .filter(|question| !covered.contains(&(question.poi_id.clone(), question.category))),
        );
        questions
    }
}

fn to_shelter(entity: &ShelterEntity) -> Shelter {
    let mut pois = vec![entity.home_poi()];
    pois.extend(entity.pois.iter().cloned().map(Poi::from));
    Shelter {
        code: entity.code.clone(),
        name: entity.name.clone(),
        coordinate: Coordinate::new(entity.latitude, entity.longitude),
        pois,
    }
}

impl ReferenceData for JsonReferenceData {
    fn shelter_by_code(&self, code: &str) -> BoxFuture<'static, Result<Option<Shelter>, ReferenceError>> {
        let shelter = self.find_shelter(code);
        Box::pin(async move { Ok(shelter) })
    }

    fn questions_for(
        &self,
        pois: &[Poi],
        categories: &[QuestionCategory],
    ) -> BoxFuture<'static, Result<Vec<Question>, ReferenceError>> {
        let questions = self.collect_questions(pois, categories);
        Box::pin(async move { Ok(questions) })
    }
}
