//! Question sequencing and answer validation.
//!
//! The sequencer owns the ground truth for every question assigned to a session. The
//! session lifecycle code only ever asks it for question ids, public prompts, the POI a
//! location-bound question is anchored to, and whether an answer is correct.

use std::collections::HashMap;

use indexmap::IndexMap;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::geofence::Coordinate;

/// Identifier of a question inside a bank.
pub type QuestionId = String;

/// Options offered for generated surge-rank questions.
const SURGE_RANK_OPTIONS: [&str; 5] = ["A", "B", "C", "D", "E"];

/// What a question is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionCategory {
    /// Where something is; answered on site.
    Location,
    /// Facility details of a POI.
    Facility,
    /// Things around a POI; answered on site.
    Nearby,
    /// Occupancy figures of a POI.
    Capacity,
}

impl QuestionCategory {
    /// Whether answering requires being physically near the question's POI.
    pub fn is_location_bound(self) -> bool {
        matches!(self, Self::Location | Self::Nearby)
    }
}

/// Input kind a question expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    /// Free numeric input.
    Number,
    /// One of a fixed set of options.
    Select,
}

/// Ground truth for a question.
#[derive(Debug, Clone, PartialEq)]
pub enum ExpectedAnswer {
    /// Numeric fact known to `precision` decimal places.
    Number {
        /// Reference value.
        value: f64,
        /// Decimal places the fact was recorded with.
        precision: u8,
    },
    /// Exact option out of `options`.
    Select {
        /// Correct option.
        option: String,
        /// All options shown to the player.
        options: Vec<String>,
    },
}

impl ExpectedAnswer {
    /// Input kind matching this expectation.
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Number { .. } => ParamType::Number,
            Self::Select { .. } => ParamType::Select,
        }
    }
}

/// Value submitted by a player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AnswerValue {
    /// Numeric answer.
    Number(f64),
    /// Selected option.
    Text(String),
}

/// Read-only facts about a POI used as answer ground truth.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoiFacts {
    /// Number of people the POI can host.
    pub capacity: Option<u32>,
    /// Parks within walking distance.
    pub nearby_parks: Option<u32>,
    /// Storm surge risk rank.
    pub surge_rank: Option<String>,
}

/// Point of interest supplied by the reference-data collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Poi {
    /// Stable POI identifier.
    pub id: String,
    /// Where the POI is.
    pub coordinate: Coordinate,
    /// POI type (e.g. `shelter`, `park`, `school`).
    pub kind: String,
    /// Known facts.
    pub facts: PoiFacts,
}

/// A single question about one POI.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    /// Identifier unique within the bank.
    pub id: QuestionId,
    /// POI the fact is about.
    pub poi_id: String,
    /// Question category.
    pub category: QuestionCategory,
    /// Text shown to players.
    pub prompt: String,
    /// Ground truth.
    pub expected: ExpectedAnswer,
    /// Score awarded for a correct answer.
    pub points: u32,
    /// POI types this question may be used with; empty means any.
    pub required_poi_types: Vec<String>,
}

/// Whether every player races through the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SequenceMode {
    /// One order for the whole session.
    #[default]
    Shared,
    /// Each player gets their own order.
    PerPlayer,
}

/// Tunables for building and validating sequences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequencerSettings {
    /// Shared or per-player ordering.
    pub mode: SequenceMode,
    /// Maximum sequence length per player.
    pub questions_per_player: usize,
    /// Extra tolerance for numeric answers as a fraction of the expected value.
    pub relative_tolerance: f64,
}

/// Deterministic question sequencer for one session.
#[derive(Debug, Clone)]
pub struct QuestionSequencer {
    seed: u64,
    settings: SequencerSettings,
    bank: IndexMap<QuestionId, Question>,
    pois: HashMap<String, Poi>,
}

impl QuestionSequencer {
    /// Build a sequencer for `session_id` from the POIs in play and a question bank.
    ///
    /// Questions about POIs outside `pois`, or whose `required_poi_types` exclude the
    /// POI's type, are dropped. The retained bank is ordered by question id so the
    /// collaborator's ordering never influences the generated sequences.
    pub fn new(
        session_id: Uuid,
        settings: SequencerSettings,
        pois: Vec<Poi>,
        questions: Vec<Question>,
    ) -> Self {
        let pois: HashMap<String, Poi> = pois.into_iter().map(|poi| (poi.id.clone(), poi)).collect();

        let mut eligible: Vec<Question> = questions
            .into_iter()
            .filter(|question| match pois.get(&question.poi_id) {
                Some(poi) => {
                    question.required_poi_types.is_empty()
                        || question.required_poi_types.iter().any(|kind| *kind == poi.kind)
                }
                None => false,
            })
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));

        let (high, low) = session_id.as_u64_pair();
        Self {
            seed: high ^ low,
            settings,
            bank: eligible.into_iter().map(|q| (q.id.clone(), q)).collect(),
            pois,
        }
    }

    /// Number of usable questions.
    pub fn bank_len(&self) -> usize {
        self.bank.len()
    }

    /// Ordered question ids assigned to `player_id`.
    pub fn sequence_for(&self, player_id: &str) -> Vec<QuestionId> {
        let seed = match self.settings.mode {
            SequenceMode::Shared => self.seed,
            SequenceMode::PerPlayer => self.seed ^ fnv1a(player_id.as_bytes()),
        };

        let mut ids: Vec<QuestionId> = self.bank.keys().cloned().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        ids.shuffle(&mut rng);
        ids.truncate(self.settings.questions_per_player);
        ids
    }

    /// Look up a question by id.
    pub fn question(&self, id: &str) -> Option<&Question> {
        self.bank.get(id)
    }

    /// Ground truth for a question.
    pub fn answer_for(&self, id: &str) -> Option<&ExpectedAnswer> {
        self.bank.get(id).map(|question| &question.expected)
    }

    /// Points awarded for a question, zero if unknown.
    pub fn points_for(&self, id: &str) -> u32 {
        self.bank.get(id).map_or(0, |question| question.points)
    }

    /// Coordinate a player must be near to answer, for location-bound questions only.
    pub fn location_target(&self, id: &str) -> Option<Coordinate> {
        let question = self.bank.get(id)?;
        if !question.category.is_location_bound() {
            return None;
        }
        self.pois.get(&question.poi_id).map(|poi| poi.coordinate)
    }

    /// Check a submitted answer. Unknown questions and mismatched input kinds are incorrect.
    pub fn is_correct(&self, id: &str, answer: &AnswerValue) -> bool {
        match (self.answer_for(id), answer) {
            (Some(ExpectedAnswer::Number { value, precision }), AnswerValue::Number(given)) => {
                given.is_finite() && (given - value).abs() <= self.tolerance(*value, *precision)
            }
            (Some(ExpectedAnswer::Select { option, .. }), AnswerValue::Text(given)) => {
                given == option
            }
            _ => false,
        }
    }

    fn tolerance(&self, expected: f64, precision: u8) -> f64 {
        let base = 0.5 * 10f64.powi(-i32::from(precision));
        base.max(expected.abs() * self.settings.relative_tolerance)
    }
}

/// Derive questions from POI facts for the requested categories.
///
/// Location questions cannot be derived from facts and only come from curated banks.
pub fn questions_from_facts(pois: &[Poi], categories: &[QuestionCategory]) -> Vec<Question> {
    let wants = |category: QuestionCategory| categories.is_empty() || categories.contains(&category);
    let mut questions = Vec::new();

    for poi in pois {
        if let Some(capacity) = poi.facts.capacity.filter(|_| wants(QuestionCategory::Capacity)) {
            questions.push(Question {
                id: format!("{}:capacity", poi.id),
                poi_id: poi.id.clone(),
                category: QuestionCategory::Capacity,
                prompt: "How many people can this shelter host?".into(),
                expected: ExpectedAnswer::Number {
                    value: f64::from(capacity),
                    precision: 0,
                },
                points: 1,
                required_poi_types: Vec::new(),
            });
        }

        if let Some(parks) = poi.facts.nearby_parks.filter(|_| wants(QuestionCategory::Nearby)) {
            questions.push(Question {
                id: format!("{}:nearby_parks", poi.id),
                poi_id: poi.id.clone(),
                category: QuestionCategory::Nearby,
                prompt: "How many parks are within walking distance of this spot?".into(),
                expected: ExpectedAnswer::Number {
                    value: f64::from(parks),
                    precision: 0,
                },
                points: 1,
                required_poi_types: Vec::new(),
            });
        }

        if let Some(rank) = poi
            .facts
            .surge_rank
            .as_ref()
            .filter(|_| wants(QuestionCategory::Facility))
        {
            let mut options: Vec<String> = SURGE_RANK_OPTIONS.iter().map(|o| o.to_string()).collect();
            if !options.contains(rank) {
                options.push(rank.clone());
            }
            questions.push(Question {
                id: format!("{}:surge_rank", poi.id),
                poi_id: poi.id.clone(),
                category: QuestionCategory::Facility,
                prompt: "What storm surge rank is posted at this facility?".into(),
                expected: ExpectedAnswer::Select {
                    option: rank.clone(),
                    options,
                },
                points: 1,
                required_poi_types: Vec::new(),
            });
        }
    }

    questions
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, byte| (hash ^ u64::from(*byte)).wrapping_mul(PRIME))
}
