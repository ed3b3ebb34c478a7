//! Parsed script output: what a story needs generated.

use std::collections::HashSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use pcast_models::AnchorType;

use crate::error::{WorkerError, WorkerResult};

/// Everything to generate for one story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoryPlan {
    pub scenes: Vec<ScenePlan>,
    /// Recurring characters and settings
    #[serde(default)]
    pub entities: Vec<EntityRef>,
    /// Prompt for the background music bed
    #[serde(default)]
    pub music_prompt: Option<String>,
}

/// One scene: narration text plus the shots shown while it plays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScenePlan {
    pub scene_id: u32,
    pub scene_number: u32,
    pub narration: String,
    #[serde(default)]
    pub shots: Vec<ShotPlan>,
}

/// One still image within a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShotPlan {
    pub prompt: String,
    pub duration_secs: f64,
    /// Entities visible in the shot
    #[serde(default)]
    pub entity_ids: Vec<String>,
}

/// A character or setting that may recur across shots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    pub entity_id: String,
    pub anchor_type: AnchorType,
    pub name: String,
    pub description: String,
}

impl StoryPlan {
    /// Total number of shots across all scenes.
    pub fn shot_count(&self) -> usize {
        self.scenes.iter().map(|s| s.shots.len()).sum()
    }

    /// Reject plans that cannot be dispatched.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.scenes.is_empty() {
            return Err(WorkerError::invalid_plan("plan has no scenes"));
        }

        let mut scene_ids = HashSet::new();
        for scene in &self.scenes {
            if !scene_ids.insert(scene.scene_id) {
                return Err(WorkerError::invalid_plan(format!(
                    "duplicate scene id {}",
                    scene.scene_id
                )));
            }
            if scene.narration.trim().is_empty() {
                return Err(WorkerError::invalid_plan(format!(
                    "scene {} has no narration",
                    scene.scene_id
                )));
            }
            if let Some(shot) = scene
                .shots
                .iter()
                .find(|shot| !shot.duration_secs.is_finite() || shot.duration_secs <= 0.0)
            {
                return Err(WorkerError::invalid_plan(format!(
                    "scene {} has a shot with duration {}",
                    scene.scene_id, shot.duration_secs
                )));
            }
        }

        let mut entity_ids = HashSet::new();
        for entity in &self.entities {
            if !entity_ids.insert(entity.entity_id.as_str()) {
                return Err(WorkerError::invalid_plan(format!(
                    "duplicate entity id {}",
                    entity.entity_id
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(scene_id: u32, shots: usize) -> ScenePlan {
        ScenePlan {
            scene_id,
            scene_number: scene_id,
            narration: "The tide came in.".to_string(),
            shots: (0..shots)
                .map(|i| ShotPlan {
                    prompt: format!("shot {}", i),
                    duration_secs: 4.0,
                    entity_ids: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_plan_deserializes_from_camel_case() {
        let json = r#"{
            "scenes": [{
                "sceneId": 1,
                "sceneNumber": 1,
                "narration": "Night falls on the harbour.",
                "shots": [{"prompt": "harbour at dusk", "durationSecs": 5.0, "entityIds": ["harbour"]}]
            }],
            "entities": [{
                "entityId": "harbour",
                "anchorType": "setting",
                "name": "The harbour",
                "description": "A small stone harbour"
            }]
        }"#;

        let plan: StoryPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.shot_count(), 1);
        assert_eq!(plan.entities[0].anchor_type, AnchorType::Setting);
        assert!(plan.music_prompt.is_none());
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_plans() {
        let empty = StoryPlan {
            scenes: Vec::new(),
            entities: Vec::new(),
            music_prompt: None,
        };
        assert!(matches!(empty.validate(), Err(WorkerError::InvalidPlan(_))));

        let duplicate = StoryPlan {
            scenes: vec![scene(1, 2), scene(1, 1)],
            entities: Vec::new(),
            music_prompt: None,
        };
        assert!(duplicate.validate().is_err());

        let mut zero_length = scene(2, 1);
        zero_length.shots[0].duration_secs = 0.0;
        let plan = StoryPlan {
            scenes: vec![zero_length],
            entities: Vec::new(),
            music_prompt: None,
        };
        assert!(plan.validate().is_err());
    }
}
