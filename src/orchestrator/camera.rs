use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// One camera entry from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub name: String,
    pub address: String,
    pub mode: String,
}

/// Source of the camera list for a counting mode.
pub trait CameraDirectory: Send {
    fn list_cameras(&self, mode: &str) -> Result<Vec<CameraInfo>, SourceError>;
}

impl<T: CameraDirectory + Sync + ?Sized> CameraDirectory for Arc<T> {
    fn list_cameras(&self, mode: &str) -> Result<Vec<CameraInfo>, SourceError> {
        (**self).list_cameras(mode)
    }
}

/// Fixed camera list.
#[derive(Debug, Clone, Default)]
pub struct StaticCameras(pub Vec<CameraInfo>);

impl CameraDirectory for StaticCameras {
    fn list_cameras(&self, mode: &str) -> Result<Vec<CameraInfo>, SourceError> {
        Ok(self.0.iter().filter(|c| c.mode == mode).cloned().collect())
    }
}

/// Pick the camera named `name`, or the first listed when no name is set.
pub fn resolve_camera<'a>(cameras: &'a [CameraInfo], name: Option<&str>) -> Option<&'a CameraInfo> {
    match name {
        Some(name) => cameras.iter().find(|c| c.name == name),
        None => cameras.first(),
    }
}
