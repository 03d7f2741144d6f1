//! Images built during one run.
//!
//! The registry maps image config names to the image and tag that was built, so that
//! deployments can reference freshly built images. It is passed explicitly from the
//! build orchestrator to whoever needs it and merged upwards by callers.

use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRef {
    pub image_name: String,
    pub tag: String,
}

impl ImageRef {
    /// `image:tag`
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image_name, self.tag)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuiltImages {
    images: BTreeMap<String, ImageRef>,
}

impl BuiltImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config_name: impl Into<String>, image: ImageRef) {
        self.images.insert(config_name.into(), image);
    }

    pub fn get(&self, config_name: &str) -> Option<&ImageRef> {
        self.images.get(config_name)
    }

    /// Take over all entries of `other`, replacing entries with the same name.
    pub fn merge(&mut self, other: &Self) {
        for (name, image) in &other.images {
            self.images.insert(name.clone(), image.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ImageRef)> {
        self.images.iter()
    }
}
