//! Scripted replay engine
//!
//! Replays recorded OCR text for known frame ids. Used by the command line
//! replay mode and by scanner tests, where a deterministic engine is needed.
//! Script entries may name a captured image; the engine then only answers
//! when the region of interest actually shows something.

use anyhow::{Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::capture::{Frame, Rect};
use crate::vision::{Prediction, RecognitionEngine};

/// Recorded recognizer output for one frame
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedFrame {
    /// Text lines the recognizer read from the frame
    #[serde(default)]
    pub lines: Vec<String>,
    /// Simulated recognition latency in milliseconds
    #[serde(default)]
    pub latency_ms: u64,
    /// Captured frame image, relative to the script file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    /// Region of interest within the image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roi: Option<Rect>,
}

impl ScriptedFrame {
    pub fn new<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Load a replay script: a JSON array of frames, frame ids assigned from 0
pub fn load_script(path: &Path) -> Result<Vec<ScriptedFrame>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay script: {:?}", path))?;
    let frames: Vec<ScriptedFrame> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse replay script: {:?}", path))?;
    Ok(frames)
}

/// Frames to feed the scanner for `script`, frame `i` having id `i`.
///
/// Entries naming an image are decoded from disk, resolved against
/// `base_dir`; the others carry no pixels.
pub fn script_frames(script: &[ScriptedFrame], base_dir: &Path) -> Result<Vec<Frame>> {
    script
        .iter()
        .enumerate()
        .map(|(i, scripted)| {
            let id = i as u64;
            let frame = match &scripted.image {
                Some(image) => {
                    let path = base_dir.join(image);
                    let decoded = image::open(&path)
                        .with_context(|| format!("Failed to load frame image: {:?}", path))?;
                    Frame::from_image(id, decoded.to_rgba8())
                }
                None => Frame::empty(id),
            };
            Ok(match scripted.roi {
                Some(roi) => frame.with_roi(roi),
                None => frame,
            })
        })
        .collect()
}

/// A region of one flat color cannot show a card
fn is_blank(region: &RgbaImage) -> bool {
    let mut pixels = region.pixels();
    match pixels.next() {
        Some(first) => pixels.all(|p| p == first),
        None => true,
    }
}

/// Engine that answers from a shared script keyed by frame id.
///
/// Frames missing from the script produce an empty prediction, as do frames
/// whose region of interest is blank.
#[derive(Debug, Clone)]
pub struct ScriptedEngine {
    name: String,
    script: Arc<HashMap<u64, ScriptedFrame>>,
}

impl ScriptedEngine {
    /// Create an engine over `frames`, where frame `i` has id `i`
    pub fn new(name: impl Into<String>, frames: Vec<ScriptedFrame>) -> Self {
        let script = frames
            .into_iter()
            .enumerate()
            .map(|(i, f)| (i as u64, f))
            .collect();
        Self::shared(name, Arc::new(script))
    }

    /// Create an engine sharing an existing script with other engines
    pub fn shared(name: impl Into<String>, script: Arc<HashMap<u64, ScriptedFrame>>) -> Self {
        Self {
            name: name.into(),
            script,
        }
    }

    /// Another engine over the same script
    pub fn sibling(&self, name: impl Into<String>) -> Self {
        Self::shared(name, self.script.clone())
    }

    /// Number of scripted frames
    pub fn len(&self) -> usize {
        self.script.len()
    }

    pub fn is_empty(&self) -> bool {
        self.script.is_empty()
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn recognize(&mut self, frame: &Frame) -> Prediction {
        let start = Instant::now();

        let blank = frame.roi_image().is_some_and(|region| is_blank(&region));

        let prediction = match self.script.get(&frame.id) {
            Some(_) if blank => {
                debug!("{}: frame {} has a blank region of interest", self.name, frame.id);
                Prediction::empty(frame.clone())
            }
            Some(scripted) => {
                if scripted.latency_ms > 0 {
                    std::thread::sleep(Duration::from_millis(scripted.latency_ms));
                }
                Prediction::from_text_lines(frame.clone(), &scripted.lines)
            }
            None => Prediction::empty(frame.clone()),
        };

        let duration = start.elapsed();
        debug!(
            "{}: frame {} recognized in {:?} (number: {})",
            self.name,
            frame.id,
            duration,
            prediction.number.is_some()
        );

        prediction.with_duration(duration).with_engine(self.name.clone())
    }
}
