//! Object key layout for story media.

use pcast_models::{JobDetails, StoryId};

/// Key for a job's generated media.
pub fn job_media_key(user_id: &str, story_id: &StoryId, details: &JobDetails, extension: &str) -> String {
    let name = match details {
        JobDetails::Script => "script".to_string(),
        JobDetails::AudioSegment { scene_number, .. } => format!("audio/scene-{:03}", scene_number),
        JobDetails::Image {
            scene_id, shot_index, ..
        } => format!("images/scene-{}-shot-{}", scene_id, shot_index),
        JobDetails::Anchor { entity_id, .. } => format!("anchors/{}", sanitize(entity_id)),
        JobDetails::Music => "music/background".to_string(),
    };
    format!("{}/{}/{}.{}", user_id, story_id, name, extension)
}

/// Key for the assembled narration track.
pub fn narration_key(user_id: &str, story_id: &StoryId) -> String {
    format!("{}/{}/audio/narration.mp3", user_id, story_id)
}

/// Content type for a media file extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "json" => "application/json",
        "mp4" => "video/mp4",
        _ => "application/octet-stream",
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcast_models::AnchorType;

    #[test]
    fn test_media_keys() {
        let story = StoryId::from("story-1");
        let image = JobDetails::Image {
            scene_id: 4,
            shot_index: 2,
            target_duration_secs: 3.0,
        };
        assert_eq!(
            job_media_key("u1", &story, &image, "png"),
            "u1/story-1/images/scene-4-shot-2.png"
        );

        let anchor = JobDetails::Anchor {
            entity_id: "char/old sailor".to_string(),
            anchor_type: AnchorType::Character,
            name: "Old sailor".to_string(),
            description: String::new(),
            appearances: 3,
        };
        assert_eq!(
            job_media_key("u1", &story, &anchor, "png"),
            "u1/story-1/anchors/char_old_sailor.png"
        );
        assert_eq!(narration_key("u1", &story), "u1/story-1/audio/narration.mp3");
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("mp3"), "audio/mpeg");
        assert_eq!(content_type_for("bin"), "application/octet-stream");
    }
}
