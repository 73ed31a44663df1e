//! Known re-identification model profiles.

use serde::Serialize;

/// Static description of an embedding model served by the inference service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelProfile {
    /// Model name as understood by the inference service.
    pub name: &'static str,
    /// Output vector dimension.
    pub dimension: usize,
    /// Model family (clip, dinov2, megadescriptor, resnet).
    pub family: &'static str,
    pub description: &'static str,
}

const PROFILES: &[ModelProfile] = &[
    ModelProfile {
        name: "clip-vit-l14",
        dimension: 768,
        family: "clip",
        description: "CLIP ViT-L/14 image tower: fast, general-purpose global descriptor",
    },
    ModelProfile {
        name: "dinov2-vitl14",
        dimension: 1024,
        family: "dinov2",
        description: "DINOv2 ViT-L/14: self-supervised features, robust to pose",
    },
    ModelProfile {
        name: "megadescriptor-l-384",
        dimension: 1536,
        family: "megadescriptor",
        description: "MegaDescriptor-L-384: animal re-identification specialist",
    },
    ModelProfile {
        name: "resnet152-reid",
        dimension: 2048,
        family: "resnet",
        description: "ResNet-152 fine-tuned for individual re-identification",
    },
];

/// All known profiles, in recommended cascade order.
pub fn known_profiles() -> &'static [ModelProfile] {
    PROFILES
}

/// Look up a profile by exact model name.
pub fn profile(name: &str) -> Option<&'static ModelProfile> {
    PROFILES.iter().find(|p| p.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reid_core::defaults::SUPPORTED_DIMENSIONS;

    #[test]
    fn test_profiles_cover_supported_dimensions() {
        let dims: Vec<usize> = known_profiles().iter().map(|p| p.dimension).collect();
        assert_eq!(dims, SUPPORTED_DIMENSIONS.to_vec());
    }

    #[test]
    fn test_profile_lookup() {
        assert_eq!(profile("dinov2-vitl14").map(|p| p.dimension), Some(1024));
        assert!(profile("DINOV2-VITL14").is_none());
        assert!(profile("unknown").is_none());
    }

    #[test]
    fn test_default_models_are_known() {
        use reid_core::defaults::*;
        for name in [
            EMBED_MODEL,
            CASCADE_STAGE1_MODEL,
            CASCADE_STAGE2_MODEL,
            CASCADE_STAGE3_MODEL,
        ] {
            assert!(profile(name).is_some(), "{} missing from profiles", name);
        }
    }
}
