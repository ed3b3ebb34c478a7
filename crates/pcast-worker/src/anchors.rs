//! Anchor planning.
//!
//! A recurring entity gets one reference image so every shot it appears in
//! renders it consistently. Entities seen only once are recorded as
//! `not_needed`.

use std::collections::HashMap;

use tracing::debug;

use pcast_models::{Job, JobId, JobStatus, StoryId};

use crate::plan::StoryPlan;

/// Anchor jobs for one story.
#[derive(Debug, Clone, Default)]
pub struct AnchorPlan {
    /// One job per declared entity
    pub jobs: Vec<Job>,
    /// Entity id to the anchor job that must be generated for it
    pub required: HashMap<String, JobId>,
}

impl AnchorPlan {
    /// Jobs that need a reference image generated.
    pub fn pending_jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter().filter(|job| job.status == JobStatus::Pending)
    }
}

/// Count the shots each entity appears in. A shot listing an entity twice
/// counts once.
pub fn count_appearances(plan: &StoryPlan) -> HashMap<String, u32> {
    let mut counts: HashMap<String, u32> = HashMap::new();
    for shot in plan.scenes.iter().flat_map(|scene| scene.shots.iter()) {
        let mut seen: Vec<&str> = Vec::with_capacity(shot.entity_ids.len());
        for entity_id in &shot.entity_ids {
            if seen.contains(&entity_id.as_str()) {
                continue;
            }
            seen.push(entity_id);
            *counts.entry(entity_id.clone()).or_default() += 1;
        }
    }
    counts
}

/// Build anchor jobs for every declared entity.
///
/// Shots may mention undeclared entities; those get no anchor.
pub fn plan_anchors(story_id: &StoryId, plan: &StoryPlan) -> AnchorPlan {
    let appearances = count_appearances(plan);
    let mut anchors = AnchorPlan::default();

    for entity in &plan.entities {
        let count = appearances.get(&entity.entity_id).copied().unwrap_or(0);
        let job = Job::anchor(
            story_id.clone(),
            entity.entity_id.clone(),
            entity.anchor_type,
            entity.name.clone(),
            entity.description.clone(),
            count,
        );
        debug!(
            story_id = %story_id,
            entity_id = %entity.entity_id,
            appearances = count,
            status = %job.status,
            "Planned anchor"
        );
        if job.status == JobStatus::Pending {
            anchors.required.insert(entity.entity_id.clone(), job.job_id.clone());
        }
        anchors.jobs.push(job);
    }

    anchors
}
