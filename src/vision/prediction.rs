//! Per-frame recognition output

use std::fmt;
use std::time::Duration;

use crate::capture::{Frame, Rect};
use crate::vision::card_text;

/// Card expiry date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Expiry {
    /// Month, 1-12
    pub month: u32,
    /// Four-digit year
    pub year: u32,
}

impl Expiry {
    pub fn new(month: u32, year: u32) -> Self {
        Self { month, year }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:02}", self.month, self.year % 100)
    }
}

/// One engine's guess for one frame.
///
/// Created once per engine invocation and never mutated afterwards; the
/// scanner shares it behind an `Arc` between the aggregator and observers.
#[derive(Debug, Clone)]
pub struct Prediction {
    /// Frame the engine processed
    pub frame: Frame,
    /// Crop rectangle the engine actually used
    pub crop: Rect,
    /// Recognized card number, digits only
    pub number: Option<String>,
    /// Recognized expiry month
    pub expiry_month: Option<u32>,
    /// Recognized expiry year (four digits)
    pub expiry_year: Option<u32>,
    /// Recognized cardholder name; several candidate lines are newline-joined
    pub name: Option<String>,
    /// Detected boxes for the number, possibly one per digit group
    pub number_boxes: Vec<Rect>,
    /// Detected boxes for the expiry
    pub expiry_boxes: Vec<Rect>,
    /// Detected boxes for the name
    pub name_boxes: Vec<Rect>,
    /// Time the engine spent on this frame
    pub duration: Duration,
    /// Name of the engine that produced the prediction
    pub engine: String,
}

impl Prediction {
    /// Empty prediction for `frame`: nothing recognized
    pub fn empty(frame: Frame) -> Self {
        let crop = frame.roi;
        Self {
            frame,
            crop,
            number: None,
            expiry_month: None,
            expiry_year: None,
            name: None,
            number_boxes: Vec::new(),
            expiry_boxes: Vec::new(),
            name_boxes: Vec::new(),
            duration: Duration::ZERO,
            engine: String::new(),
        }
    }

    pub fn with_number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn with_expiry(mut self, month: u32, year: u32) -> Self {
        self.expiry_month = Some(month);
        self.expiry_year = Some(year);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }

    /// Expiry when both month and year were recognized
    pub fn expiry(&self) -> Option<Expiry> {
        match (self.expiry_month, self.expiry_year) {
            (Some(month), Some(year)) => Some(Expiry::new(month, year)),
            _ => None,
        }
    }

    /// Whether any field was recognized
    pub fn is_empty(&self) -> bool {
        self.number.is_none() && self.expiry().is_none() && self.name.is_none()
    }

    /// Newline-delimited name fragments, trimmed, empty ones dropped
    pub fn name_fragments(&self) -> impl Iterator<Item = &str> {
        self.name
            .as_deref()
            .unwrap_or("")
            .lines()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Union of the number boxes
    pub fn number_box(&self) -> Option<Rect> {
        Rect::union_all(&self.number_boxes)
    }

    /// Union of the expiry boxes
    pub fn expiry_box(&self) -> Option<Rect> {
        Rect::union_all(&self.expiry_boxes)
    }

    /// Union of the name boxes
    pub fn name_box(&self) -> Option<Rect> {
        Rect::union_all(&self.name_boxes)
    }

    /// Build a prediction from recognized text lines.
    ///
    /// The first line carrying a valid card number supplies the number, the
    /// first line with an expiry pattern supplies the expiry, and every
    /// remaining line that looks like a name is kept as a name fragment.
    pub fn from_text_lines<S: AsRef<str>>(frame: Frame, lines: &[S]) -> Self {
        let mut prediction = Prediction::empty(frame);
        let mut names = Vec::new();

        for line in lines {
            let line = line.as_ref();
            if prediction.number.is_none() {
                if let Some(number) = card_text::extract_number(line) {
                    prediction.number = Some(number);
                    continue;
                }
            }
            if prediction.expiry().is_none() {
                if let Some((month, year)) = card_text::extract_expiry(line) {
                    prediction.expiry_month = Some(month);
                    prediction.expiry_year = Some(year);
                    continue;
                }
            }
            if let Some(name) = card_text::clean_name(line) {
                names.push(name);
            }
        }

        if !names.is_empty() {
            prediction.name = Some(names.join("\n"));
        }
        prediction
    }
}
