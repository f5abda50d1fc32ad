//! TorchScript-backed vision capabilities. Each wraps a scripted pipeline
//! exported with its preprocessing and generation loop baked in, so the
//! wrappers stay thin: tensorize the image, forward once, decode.

use super::{decode_tokens, load_json_strings, CapabilityError, Captioner, Detection, Detector, VisualQa};
use image::imageops::FilterType;
use image::RgbImage;
use std::path::Path;
use tch::{no_grad, CModule, Device, IValue, Kind, Tensor};

const CAPTION_INPUT_SIDE: u32 = 384;
const VQA_INPUT_SIDE: u32 = 384;
const DETECTION_INPUT_SIDE: u32 = 800;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize, scale to `[0, 1]`, normalize, and lay out as a `[1, 3, H, W]`
/// float tensor on the target device.
fn image_to_tensor(image: &RgbImage, side: u32, device: Device) -> Tensor {
    let resized = image::imageops::resize(image, side, side, FilterType::Triangle);
    let pixels = Tensor::from_slice(resized.as_raw())
        .view([side as i64, side as i64, 3])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0;
    let mean = Tensor::from_slice(&IMAGENET_MEAN).view([3, 1, 1]);
    let std = Tensor::from_slice(&IMAGENET_STD).view([3, 1, 1]);
    ((pixels - mean) / std).unsqueeze(0).to_device(device)
}

fn single_tensor(value: IValue) -> Result<Tensor, CapabilityError> {
    match value {
        IValue::Tensor(t) => Ok(t),
        other => Err(CapabilityError::OutputShape(format!(
            "expected a tensor, got {:?}",
            other
        ))),
    }
}

/// Pulls a named tensor out of a scripted module's output dict.
fn dict_tensor(entries: &[(IValue, IValue)], key: &str) -> Result<Tensor, CapabilityError> {
    entries
        .iter()
        .find_map(|(k, v)| match (k, v) {
            (IValue::String(name), IValue::Tensor(t)) if name == key => Some(t.shallow_clone()),
            _ => None,
        })
        .ok_or_else(|| CapabilityError::OutputShape(format!("missing `{}` in output dict", key)))
}

/// Image captioning over a scripted encoder-decoder that emits token ids.
pub struct TorchCaptioner {
    module: CModule,
    vocab: Vec<String>,
    device: Device,
}

impl TorchCaptioner {
    pub fn load(model: &Path, vocab: &Path, device: Device) -> Result<Self, CapabilityError> {
        Ok(Self {
            module: CModule::load_on_device(model, device)?,
            vocab: load_json_strings(vocab)?,
            device,
        })
    }
}

impl Captioner for TorchCaptioner {
    fn caption(&self, image: &RgbImage) -> Result<String, CapabilityError> {
        let input = image_to_tensor(image, CAPTION_INPUT_SIDE, self.device);
        let ids = no_grad(|| self.module.forward_ts(&[input]))?;
        decode_tokens(&ids, &self.vocab)
    }
}

/// Object detection over a scripted model returning a
/// `{scores, labels, boxes}` dict, mapped through a class-label file.
pub struct TorchDetector {
    module: CModule,
    labels: Vec<String>,
    device: Device,
}

impl TorchDetector {
    pub fn load(model: &Path, labels: &Path, device: Device) -> Result<Self, CapabilityError> {
        Ok(Self {
            module: CModule::load_on_device(model, device)?,
            labels: load_json_strings(labels)?,
            device,
        })
    }
}

impl Detector for TorchDetector {
    fn detect(&self, image: &RgbImage, threshold: f32) -> Result<Vec<Detection>, CapabilityError> {
        let input = image_to_tensor(image, DETECTION_INPUT_SIDE, self.device);
        let output = no_grad(|| self.module.forward_is(&[IValue::Tensor(input)]))?;
        let entries = match output {
            IValue::GenericDict(entries) => entries,
            other => {
                return Err(CapabilityError::OutputShape(format!(
                    "expected an output dict, got {:?}",
                    other
                )))
            }
        };

        let scores = dict_tensor(&entries, "scores")?.to_kind(Kind::Float);
        let label_ids = dict_tensor(&entries, "labels")?;
        let boxes = dict_tensor(&entries, "boxes")?.to_kind(Kind::Float);

        let scores = Vec::<f32>::try_from(&scores.view([-1]))?;
        let label_ids = Vec::<i64>::try_from(&label_ids.view([-1]))?;
        if scores.len() != label_ids.len() {
            return Err(CapabilityError::OutputShape(format!(
                "{} scores for {} labels",
                scores.len(),
                label_ids.len()
            )));
        }

        let mut detections = Vec::new();
        for (i, (&score, &label_id)) in scores.iter().zip(label_ids.iter()).enumerate() {
            if score < threshold {
                continue;
            }
            let label = self.labels.get(label_id as usize).ok_or_else(|| {
                CapabilityError::OutputShape(format!("unknown class id {}", label_id))
            })?;
            let row = Vec::<f32>::try_from(&boxes.get(i as i64).view([-1]))?;
            if row.len() != 4 {
                return Err(CapabilityError::OutputShape(format!(
                    "bounding box with {} coordinates",
                    row.len()
                )));
            }
            detections.push(Detection {
                label: label.clone(),
                score,
                bounding_box: [row[0], row[1], row[2], row[3]],
            });
        }
        Ok(detections)
    }
}

/// Visual question answering: scripted pipeline taking the image tensor and
/// the question string, emitting answer token ids.
pub struct TorchVisualQa {
    module: CModule,
    vocab: Vec<String>,
    device: Device,
}

impl TorchVisualQa {
    pub fn load(model: &Path, vocab: &Path, device: Device) -> Result<Self, CapabilityError> {
        Ok(Self {
            module: CModule::load_on_device(model, device)?,
            vocab: load_json_strings(vocab)?,
            device,
        })
    }
}

impl VisualQa for TorchVisualQa {
    fn answer(&self, image: &RgbImage, question: &str) -> Result<String, CapabilityError> {
        let input = image_to_tensor(image, VQA_INPUT_SIDE, self.device);
        let output = no_grad(|| {
            self.module
                .forward_is(&[IValue::Tensor(input), IValue::String(question.to_owned())])
        })?;
        let ids = single_tensor(output)?;
        decode_tokens(&ids, &self.vocab)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_tensor_has_unit_batch_and_channel_layout() {
        let image = RgbImage::from_pixel(10, 6, image::Rgb([128, 64, 32]));
        let tensor = image_to_tensor(&image, 32, Device::Cpu);
        assert_eq!(tensor.size(), vec![1, 3, 32, 32]);
        assert_eq!(tensor.kind(), Kind::Float);
    }

    #[test]
    fn dict_tensor_finds_entry_by_key() {
        let entries = vec![
            (
                IValue::String("scores".into()),
                IValue::Tensor(Tensor::from_slice(&[0.9f32])),
            ),
            (
                IValue::String("labels".into()),
                IValue::Tensor(Tensor::from_slice(&[3i64])),
            ),
        ];
        let labels = dict_tensor(&entries, "labels").unwrap();
        assert_eq!(Vec::<i64>::try_from(&labels).unwrap(), vec![3]);
        assert!(dict_tensor(&entries, "boxes").is_err());
    }
}
