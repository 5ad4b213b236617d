// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! TGA image assets: the canonical [`AssetType`] instantiation.
//!
//! Decodes uncompressed truecolor and greyscale TGA files into an owned
//! pixel buffer. Colour-mapped, run-length encoded, and interleaved images
//! are rejected — this is an asset-pipeline format, not a general TGA
//! reader, and build tooling is expected to emit the plain variants.

use crate::client::AssetType;
use loadstone_core::key::TypeKey;

const HEADER_LEN: usize = 18;
// uncompressed image types
const TYPE_TRUECOLOR: u8 = 2;
const TYPE_GREY: u8 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit luminance.
    Lum8,
    /// 24-bit blue/green/red.
    Bgr8,
    /// 32-bit blue/green/red/alpha.
    Bgra8,
}

impl PixelFormat {
    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Lum8 => 1,
            Self::Bgr8 => 3,
            Self::Bgra8 => 4,
        }
    }
}

/// A decoded image, row-major from the file's origin.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TgaError {
    #[error("file too small for a tga header")]
    Truncated,
    #[error("unsupported image type {0}; only uncompressed truecolor and greyscale")]
    UnsupportedType(u8),
    #[error("colour-mapped images are not supported")]
    ColourMapped,
    #[error("interleaved images are not supported")]
    Interleaved,
    #[error("unsupported pixel depth {0}")]
    UnsupportedDepth(u8),
    #[error("pixel data extends past the end of the file")]
    OutOfBounds,
}

/// Decodes a TGA byte buffer.
pub fn decode(data: &[u8]) -> Result<Image, TgaError> {
    if data.len() < HEADER_LEN {
        return Err(TgaError::Truncated);
    }
    let id_length = data[0] as usize;
    let colour_map_type = data[1];
    let image_type = data[2];
    let colour_map_length = u16::from_le_bytes([data[5], data[6]]);
    let width = u16::from_le_bytes([data[12], data[13]]) as u32;
    let height = u16::from_le_bytes([data[14], data[15]]) as u32;
    let depth = data[16];
    let descriptor = data[17];

    if image_type != TYPE_TRUECOLOR && image_type != TYPE_GREY {
        return Err(TgaError::UnsupportedType(image_type));
    }
    if colour_map_type != 0 || colour_map_length != 0 {
        return Err(TgaError::ColourMapped);
    }
    if descriptor & 0xc0 != 0 {
        return Err(TgaError::Interleaved);
    }
    let format = match depth {
        8 => PixelFormat::Lum8,
        24 => PixelFormat::Bgr8,
        32 => PixelFormat::Bgra8,
        other => return Err(TgaError::UnsupportedDepth(other)),
    };

    let offset = HEADER_LEN + id_length;
    let len = (width as usize)
        .checked_mul(height as usize)
        .and_then(|px| px.checked_mul(format.bytes_per_pixel()))
        .ok_or(TgaError::OutOfBounds)?;
    let pixels = data
        .get(offset..offset + len)
        .ok_or(TgaError::OutOfBounds)?
        .to_vec();

    Ok(Image {
        width,
        height,
        format,
        pixels,
    })
}

/// TGA textures as a cached asset type.
pub struct Tga;

impl AssetType for Tga {
    type Resource = Image;
    type Error = TgaError;

    fn type_key() -> TypeKey {
        TypeKey::new("tga")
    }

    fn parse(data: &[u8]) -> Result<Self::Resource, Self::Error> {
        decode(data)
    }
}
