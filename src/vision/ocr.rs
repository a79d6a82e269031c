//! OCR (Optical Character Recognition) module
//!
//! Reads route numbers from conditioned plate crops. Recognition runs the
//! PaddleOCR CRNN model via ONNX Runtime over the whole crop as one text
//! line; candidates are then filtered by confidence and digit count.

use anyhow::{Context, Result};
use image::GrayImage;
use std::path::Path;
use tracing::{debug, info};

use super::detection::PlateCrop;
use super::models::OnnxSession;
use super::ocr_preprocess::condition_plate;
use super::preprocess::{preprocess_for_recognition, RecognitionInput};
use crate::config::{OcrConfig, PlatePreprocessing};

/// Raw recognizer output for one crop
#[derive(Debug, Clone, PartialEq)]
pub struct OcrCandidate {
    /// Recognized text
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

impl OcrCandidate {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence,
        }
    }
}

/// An accepted route-number reading
#[derive(Debug, Clone, PartialEq)]
pub struct OcrHit {
    /// ASCII digits only
    pub text: String,
    /// Recognition confidence (0.0 - 1.0)
    pub confidence: f32,
}

/// A text recognition engine
pub trait TextRecognizer {
    /// Recognize text in a conditioned single-channel image
    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<OcrCandidate>>;
}

impl<R: TextRecognizer + ?Sized> TextRecognizer for Box<R> {
    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<OcrCandidate>> {
        (**self).recognize(image)
    }
}

/// Turn a candidate into a hit if it is confident and route-number shaped
///
/// Non-digit characters are stripped first; the remaining digit count must
/// lie in `[min_digits, max_digits]`.
pub fn accept_candidate(
    candidate: &OcrCandidate,
    min_confidence: f32,
    min_digits: usize,
    max_digits: usize,
) -> Option<OcrHit> {
    if candidate.confidence < min_confidence {
        debug!(
            "Rejected {:?}: confidence {:.3} < {:.3}",
            candidate.text, candidate.confidence, min_confidence
        );
        return None;
    }

    let digits: String = candidate
        .text
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    if !(min_digits..=max_digits).contains(&digits.len()) {
        debug!(
            "Rejected {:?}: {} digit(s) outside {}..={}",
            candidate.text,
            digits.len(),
            min_digits,
            max_digits
        );
        return None;
    }

    Some(OcrHit {
        text: digits,
        confidence: candidate.confidence,
    })
}

/// Greedy CTC decoding of a `[steps, classes]` probability matrix
///
/// Class 0 is the blank; class `i` maps to `dictionary[i - 1]`. Repeated
/// classes collapse. Confidence is the mean max-probability of the emitted
/// characters, or 0.0 when nothing is emitted.
pub fn ctc_greedy_decode(
    probs: &[f32],
    steps: usize,
    classes: usize,
    dictionary: &[String],
) -> (String, f32) {
    let mut text = String::new();
    let mut scores = Vec::new();
    let mut previous = None;

    for row in probs.chunks(classes).take(steps) {
        let Some((index, &prob)) = row.iter().enumerate().max_by(|(_, a), (_, b)| a.total_cmp(b))
        else {
            continue;
        };

        if index != 0 && previous != Some(index) {
            if let Some(symbol) = dictionary.get(index - 1) {
                text.push_str(symbol);
                scores.push(prob);
            }
        }
        previous = Some(index);
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };

    (text, confidence)
}

/// Load a PaddleOCR character dictionary (one symbol per line)
///
/// A trailing space symbol is appended, matching models exported with
/// `use_space_char`.
pub fn load_dictionary(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dictionary {:?}", path))?;

    let mut dictionary: Vec<String> = content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect();
    dictionary.push(" ".to_string());

    Ok(dictionary)
}

/// PaddleOCR CRNN recognizer
pub struct CrnnRecognizer {
    session: OnnxSession,
    dictionary: Vec<String>,
    input: RecognitionInput,
}

impl CrnnRecognizer {
    /// Load the recognition model and its dictionary
    pub fn new(model_path: &Path, dictionary_path: &Path, use_gpu: bool) -> Result<Self> {
        let session = OnnxSession::new(model_path, use_gpu)?;
        let dictionary = load_dictionary(dictionary_path)?;
        info!("Recognizer dictionary: {} symbols", dictionary.len());

        Ok(Self {
            session,
            dictionary,
            input: RecognitionInput::default(),
        })
    }
}

impl TextRecognizer for CrnnRecognizer {
    fn recognize(&mut self, image: &GrayImage) -> Result<Vec<OcrCandidate>> {
        if image.width() == 0 || image.height() == 0 {
            return Ok(Vec::new());
        }

        let tensor = preprocess_for_recognition(image, &self.input);
        let (shape, data) = self.session.run(tensor)?;

        if shape.len() != 3 {
            anyhow::bail!("Unexpected recognizer output shape {:?}", shape);
        }
        let steps = shape[1] as usize;
        let classes = shape[2] as usize;

        let (text, confidence) = ctc_greedy_decode(&data, steps, classes, &self.dictionary);
        if text.is_empty() {
            return Ok(Vec::new());
        }

        Ok(vec![OcrCandidate { text, confidence }])
    }
}

/// Conditions plate crops and reads route numbers from them
pub struct TextExtractor<R: TextRecognizer> {
    recognizer: R,
    preprocessing: PlatePreprocessing,
    min_confidence: f32,
    min_digits: usize,
    max_digits: usize,
}

impl<R: TextRecognizer> TextExtractor<R> {
    pub fn new(recognizer: R, config: &OcrConfig) -> Self {
        Self {
            recognizer,
            preprocessing: config.preprocess.clone(),
            min_confidence: config.min_confidence,
            min_digits: config.min_digits,
            max_digits: config.max_digits,
        }
    }

    /// Read the route number(s) on one crop
    pub fn extract(&mut self, crop: &PlateCrop) -> Result<Vec<OcrHit>> {
        let conditioned = condition_plate(&crop.image, &self.preprocessing);
        let candidates = self.recognizer.recognize(&conditioned)?;

        Ok(candidates
            .iter()
            .filter_map(|c| {
                accept_candidate(c, self.min_confidence, self.min_digits, self.max_digits)
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::vision::detection::CropBounds;
    use image::RgbImage;
    use std::collections::VecDeque;
    use std::io::Write;

    /// Recognizer replaying canned candidates, one list per call
    pub(crate) struct ScriptedRecognizer {
        pub responses: VecDeque<Vec<OcrCandidate>>,
        pub calls: usize,
    }

    impl ScriptedRecognizer {
        pub fn new(responses: Vec<Vec<OcrCandidate>>) -> Self {
            Self {
                responses: responses.into(),
                calls: 0,
            }
        }
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn recognize(&mut self, _image: &GrayImage) -> Result<Vec<OcrCandidate>> {
            self.calls += 1;
            Ok(self.responses.pop_front().unwrap_or_default())
        }
    }

    fn crop() -> PlateCrop {
        PlateCrop {
            image: RgbImage::new(20, 10),
            bounds: CropBounds {
                x1: 0,
                y1: 0,
                x2: 20,
                y2: 10,
            },
            class_id: 0,
            confidence: 0.9,
            frame_index: 0,
        }
    }

    #[test]
    fn test_accept_strips_non_digits() {
        let hit = accept_candidate(&OcrCandidate::new("12a3", 0.9), 0.8, 2, 4).unwrap();
        assert_eq!(hit.text, "123");
        assert!((hit.confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_accept_rejects_single_digit() {
        assert!(accept_candidate(&OcrCandidate::new("1", 0.95), 0.8, 2, 4).is_none());
    }

    #[test]
    fn test_accept_rejects_low_confidence() {
        assert!(accept_candidate(&OcrCandidate::new("1234", 0.5), 0.8, 2, 4).is_none());
    }

    #[test]
    fn test_accept_boundaries() {
        assert!(accept_candidate(&OcrCandidate::new("12", 0.8), 0.8, 2, 4).is_some());
        assert!(accept_candidate(&OcrCandidate::new("7-2-1-3", 0.99), 0.8, 2, 4).is_some());
        assert!(accept_candidate(&OcrCandidate::new("12345", 0.99), 0.8, 2, 4).is_none());
        assert!(accept_candidate(&OcrCandidate::new("bus", 0.99), 0.8, 2, 4).is_none());
    }

    fn digits_dictionary() -> Vec<String> {
        (0..10).map(|d| d.to_string()).collect()
    }

    /// One-hot rows over 11 classes (blank + 10 digits)
    fn one_hot(indices: &[usize], prob: f32) -> Vec<f32> {
        let mut probs = Vec::new();
        for &index in indices {
            let mut row = vec![(1.0 - prob) / 10.0; 11];
            row[index] = prob;
            probs.extend(row);
        }
        probs
    }

    #[test]
    fn test_ctc_collapses_repeats_and_blanks() {
        // "1", "1", blank, "1", "3", "3" -> "113"
        let probs = one_hot(&[2, 2, 0, 2, 4, 4], 0.9);
        let (text, confidence) = ctc_greedy_decode(&probs, 6, 11, &digits_dictionary());
        assert_eq!(text, "113");
        assert!((confidence - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_ctc_all_blank_is_empty() {
        let probs = one_hot(&[0, 0, 0], 0.99);
        let (text, confidence) = ctc_greedy_decode(&probs, 3, 11, &digits_dictionary());
        assert!(text.is_empty());
        assert_eq!(confidence, 0.0);
    }

    #[test]
    fn test_load_dictionary_appends_space() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "0\r\n1\n2\n").unwrap();

        let dictionary = load_dictionary(file.path()).unwrap();
        assert_eq!(dictionary, vec!["0", "1", "2", " "]);
    }

    #[test]
    fn test_extractor_filters_candidates() {
        let recognizer = ScriptedRecognizer::new(vec![vec![
            OcrCandidate::new("N12", 0.95),
            OcrCandidate::new("7", 0.99),
            OcrCandidate::new("4412", 0.4),
        ]]);
        let mut extractor = TextExtractor::new(recognizer, &OcrConfig::default());

        let hits = extractor.extract(&crop()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "12");
    }
}
