use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{
    geofence::Coordinate,
    sequencer::{ExpectedAnswer, Poi, PoiFacts, Question, QuestionCategory},
};

/// Durable record of one session transition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransitionEntity {
    /// Session the transition belongs to.
    pub session_id: Uuid,
    /// Per-session sequence number; `(session_id, seq)` is unique.
    pub seq: u64,
    /// Transition kind wire name.
    pub kind: String,
    /// RFC 3339 acceptance time.
    pub at: String,
    /// Kind-specific before/after fields.
    pub payload: serde_json::Value,
}

/// Reference data file: shelters with their surrounding POIs plus a curated question bank.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceFileEntity {
    /// Known shelters.
    #[serde(default)]
    pub shelters: Vec<ShelterEntity>,
    /// Curated questions, preferred over generated ones.
    #[serde(default)]
    pub questions: Vec<QuestionEntity>,
}

/// Shelter row as stored by the reference collaborator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShelterEntity {
    /// Public shelter code used to create sessions.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Facts about the shelter itself.
    #[serde(default)]
    pub facts: PoiFactsEntity,
    /// Points of interest around the shelter.
    #[serde(default)]
    pub pois: Vec<PoiEntity>,
}

/// Point of interest near a shelter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoiEntity {
    /// Stable POI identifier.
    pub id: String,
    /// POI type, e.g. `park` or `school`.
    pub kind: String,
    /// Degrees north.
    pub latitude: f64,
    /// Degrees east.
    pub longitude: f64,
    /// Ground truth used for generated questions.
    #[serde(default)]
    pub facts: PoiFactsEntity,
}

/// Optional ground-truth facts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoiFactsEntity {
    /// Evacuee capacity.
    #[serde(default)]
    pub capacity: Option<u32>,
    /// Parks within walking distance.
    #[serde(default)]
    pub nearby_parks: Option<u32>,
    /// Storm-surge risk rank, `A` to `E`.
    #[serde(default)]
    pub surge_rank: Option<String>,
}

/// Curated question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuestionEntity {
    /// Question identifier, unique within the bank.
    pub id: String,
    /// POI the question is anchored to.
    pub poi_id: String,
    /// What the question is about.
    pub category: QuestionCategory,
    /// Text shown to players.
    pub prompt: String,
    /// Ground truth.
    pub answer: AnswerEntity,
    /// Points on offer.
    #[serde(default = "default_points")]
    pub points: u32,
    /// POI types the shelter must have for the question to apply.
    #[serde(default)]
    pub required_poi_types: Vec<String>,
}

/// Stored ground truth of a curated question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnswerEntity {
    /// Numeric answer.
    Number {
        /// Exact value.
        value: f64,
        /// Decimal places the value is known to.
        #[serde(default)]
        precision: u8,
    },
    /// One option out of a list.
    Select {
        /// Correct option.
        option: String,
        /// All options offered.
        options: Vec<String>,
    },
}

fn default_points() -> u32 {
    1
}

impl From<PoiFactsEntity> for PoiFacts {
    fn from(value: PoiFactsEntity) -> Self {
        Self {
            capacity: value.capacity,
            nearby_parks: value.nearby_parks,
            surge_rank: value.surge_rank,
        }
    }
}

impl From<PoiEntity> for Poi {
    fn from(value: PoiEntity) -> Self {
        Self {
            id: value.id,
            coordinate: Coordinate::new(value.latitude, value.longitude),
            kind: value.kind,
            facts: value.facts.into(),
        }
    }
}

impl ShelterEntity {
    /// The shelter itself, as the home POI of a session.
    pub fn home_poi(&self) -> Poi {
        Poi {
            id: self.code.clone(),
            coordinate: Coordinate::new(self.latitude, self.longitude),
            kind: "shelter".into(),
            facts: self.facts.clone().into(),
        }
    }
}

impl From<AnswerEntity> for ExpectedAnswer {
    fn from(value: AnswerEntity) -> Self {
        match value {
            AnswerEntity::Number { value, precision } => ExpectedAnswer::Number { value, precision },
            AnswerEntity::Select { option, mut options } => {
                if !options.contains(&option) {
                    options.push(option.clone());
                }
                ExpectedAnswer::Select { option, options }
            }
        }
    }
}

impl From<QuestionEntity> for Question {
    fn from(value: QuestionEntity) -> Self {
        Self {
            id: value.id,
            poi_id: value.poi_id,
            category: value.category,
            prompt: value.prompt,
            expected: value.answer.into(),
            points: value.points,
            required_poi_types: value.required_poi_types,
        }
    }
}
