use serde_json::Value;
use std::fmt;

/// A decoded telemetry payload: flat `f32` values in row-major order plus
/// the shape they are laid out in. An empty shape is a scalar.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub values: Vec<f32>,
    pub shape: Vec<usize>,
    /// Type label declared by the server, if any.
    pub kind: Option<String>,
}

/// Sample reduced to something a presenter knows how to draw.
#[derive(Debug, Clone, PartialEq)]
pub enum Shaped {
    Scalar(f32),
    Vector(Vec<f32>),
    Image(Image),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub rows: usize,
    pub cols: usize,
    pub pixels: Vec<f32>,
}

impl Image {
    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }
}

/// Descriptive metadata shown next to a monitor's plot.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleInfo {
    pub type_label: String,
    pub shape: Vec<usize>,
    pub elements: usize,
    pub range: Option<(f32, f32)>,
}

impl fmt::Display for SampleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?} ({} elements)", self.type_label, self.shape, self.elements)?;
        if let Some((lo, hi)) = self.range {
            write!(f, " [{:.3}, {:.3}]", lo, hi)?;
        }
        Ok(())
    }
}

impl Sample {
    pub fn scalar(value: f32) -> Sample {
        Sample {
            values: vec![value],
            shape: Vec::new(),
            kind: None,
        }
    }

    pub fn with_shape(values: Vec<f32>, shape: Vec<usize>) -> Sample {
        Sample {
            values,
            shape,
            kind: None,
        }
    }

    /// Decodes the `data` field of a `data_update` event.
    ///
    /// Accepts a number, a rectangular (possibly nested) list of numbers, or
    /// an object `{type?, data, shape?}` wrapping one of those. A shape whose
    /// product matches the element count replaces the inferred one.
    pub fn from_json(data: &Value, outer_shape: Option<&[usize]>) -> Result<Sample, String> {
        let (inner, kind, inner_shape) = match data {
            Value::Object(map) => {
                let inner = map.get("data").ok_or("missing 'data' in payload object")?;
                let kind = map.get("type").and_then(Value::as_str).map(str::to_string);
                let shape = match map.get("shape") {
                    Some(v) => Some(parse_shape(v)?),
                    None => None,
                };
                (inner, kind, shape)
            }
            other => (other, None, None),
        };

        let mut values = Vec::new();
        let shape = flatten(inner, &mut values)?;

        let mut sample = Sample {
            values,
            shape,
            kind,
        };
        if let Some(shape) = inner_shape.as_deref().or(outer_shape) {
            if shape_elements(shape).is_none() {
                return Err(format!("shape {:?} overflows", shape));
            }
            sample.reshape(shape);
        }
        Ok(sample)
    }

    /// Applies `shape` when it describes exactly the contained elements.
    /// Returns whether the shape was applied.
    pub fn reshape(&mut self, shape: &[usize]) -> bool {
        if shape.is_empty() || shape_elements(shape) != Some(self.values.len()) {
            return false;
        }
        self.shape = shape.to_vec();
        true
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn info(&self) -> SampleInfo {
        let range = self.values.iter().fold(None, |acc: Option<(f32, f32)>, &v| {
            Some(match acc {
                None => (v, v),
                Some((lo, hi)) => (lo.min(v), hi.max(v)),
            })
        });
        SampleInfo {
            type_label: self.kind.clone().unwrap_or_else(|| "float32".to_string()),
            shape: self.shape.clone(),
            elements: self.values.len(),
            range,
        }
    }
}

/// Element count described by `shape`, or `None` if it does not fit in a
/// `usize`.
pub fn shape_elements(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |n, &d| n.checked_mul(d))
}

/// Parses a list of non-negative integer dimensions.
pub fn parse_shape(value: &Value) -> Result<Vec<usize>, String> {
    let dims = value.as_array().ok_or("shape must be a list")?;
    dims.iter()
        .map(|d| {
            d.as_u64()
                .and_then(|d| usize::try_from(d).ok())
                .ok_or_else(|| format!("invalid shape dimension {}", d))
        })
        .collect()
}

/// Flattens nested lists into `out`, returning the inferred shape.
fn flatten(value: &Value, out: &mut Vec<f32>) -> Result<Vec<usize>, String> {
    match value {
        Value::Number(n) => {
            let v = n.as_f64().ok_or("number out of range")?;
            out.push(v as f32);
            Ok(Vec::new())
        }
        Value::Bool(b) => {
            out.push(if *b { 1.0 } else { 0.0 });
            Ok(Vec::new())
        }
        Value::Array(items) => {
            let mut inner: Option<Vec<usize>> = None;
            for item in items {
                let shape = flatten(item, out)?;
                match &inner {
                    None => inner = Some(shape),
                    Some(expected) if *expected != shape => {
                        return Err("ragged list payload".to_string());
                    }
                    Some(_) => {}
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Ok(shape)
        }
        Value::Null => Err("null payload".to_string()),
        Value::String(_) => Err("non-numeric payload".to_string()),
        Value::Object(_) => Err("nested payload object".to_string()),
    }
}

/// Classifies a sample by dimensionality. Three or more dimensions are
/// folded into an image: a single trailing channel is selected as-is,
/// otherwise the first (up to) three channels are averaged.
pub fn classify(sample: &Sample) -> Shaped {
    match sample.shape.as_slice() {
        [] | [1] => Shaped::Scalar(sample.values.first().copied().unwrap_or(0.0)),
        [_] => Shaped::Vector(sample.values.clone()),
        [rows, cols] => Shaped::Image(Image {
            rows: *rows,
            cols: *cols,
            pixels: sample.values.clone(),
        }),
        [rows, cols, rest @ ..] => {
            let channels: usize = rest.iter().product();
            let used = channels.min(3).max(1);
            let pixels = sample
                .values
                .chunks(channels.max(1))
                .map(|px| {
                    let n = px.len().min(used);
                    px[..n].iter().sum::<f32>() / n as f32
                })
                .collect();
            Shaped::Image(Image {
                rows: *rows,
                cols: *cols,
                pixels,
            })
        }
    }
}
