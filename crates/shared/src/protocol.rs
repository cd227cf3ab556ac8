use serde::{Deserialize, Serialize};

use crate::domain::{CatalogIndex, Frame};

pub const IMAGES_COUNT_PATH: &str = "/images_count";
pub const IMAGE_BY_INDEX_PATH: &str = "/images/";
pub const SWAP_PATH: &str = "/swap/";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImagesCountResponse {
    pub count: u32,
}

/// JSON body of the photo submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SwapPhotoRequest {
    #[serde(rename = "image2Index")]
    pub image2_index: String,
    pub image_width: u32,
    pub image_height: u32,
    pub image: Vec<u8>,
}

impl SwapPhotoRequest {
    pub fn new(partner: CatalogIndex, frame: &Frame, encoded: Vec<u8>) -> Self {
        Self {
            image2_index: partner.to_string(),
            image_width: frame.width,
            image_height: frame.height,
            image: encoded,
        }
    }
}

/// What the swap endpoints answered: image bytes or a text error payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiPayload {
    Image(Vec<u8>),
    Text(String),
}
