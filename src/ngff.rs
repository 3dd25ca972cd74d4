//! OME-NGFF v0.4 multiscale metadata.
//!
//! See <https://ngff.openmicroscopy.org/0.4/#multiscale-md>.
//! Only the parts used by the cellmap tooling are modelled; everything else is
//! carried through untouched in the `extra` maps.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

const SCALE_TOLERANCE: f64 = 1e-6;

/// The `multiscales` attribute of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiscaleAttrs {
    pub multiscales: Vec<Multiscale>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Multiscale {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub axes: Vec<Axis>,
    /// Ordered from highest to lowest resolution.
    pub datasets: Vec<Dataset>,
    /// Applied after the per-dataset transformations.
    #[serde(
        rename = "coordinateTransformations",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub coordinate_transformations: Option<Vec<CoordinateTransformation>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub axis_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub path: String,
    #[serde(rename = "coordinateTransformations")]
    pub coordinate_transformations: Vec<CoordinateTransformation>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A transformation with its values either inline or in a binary file at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum CoordinateTransformation {
    Identity,
    Scale {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scale: Option<Vec<f64>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Translation {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        translation: Option<Vec<f64>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
}

impl CoordinateTransformation {
    pub fn scale(scale: Vec<f64>) -> Self {
        Self::Scale {
            scale: Some(scale),
            path: None,
        }
    }

    pub fn translation(translation: Vec<f64>) -> Self {
        Self::Translation {
            translation: Some(translation),
            path: None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Scale { .. } => "scale",
            Self::Translation { .. } => "translation",
        }
    }

    /// The inline values of a scale or translation.
    fn values(&self) -> Result<Option<&[f64]>> {
        let (values, path) = match self {
            Self::Identity => return Ok(None),
            Self::Scale { scale, path } => (scale, path),
            Self::Translation { translation, path } => (translation, path),
        };
        match (values, path) {
            (Some(values), _) => Ok(Some(values)),
            (None, Some(path)) => Err(Error::NotImplemented(format!(
                "reading {} values from {path}",
                self.type_name()
            ))),
            (None, None) => Err(Error::general(format!(
                "{} transformation has no values",
                self.type_name()
            ))),
        }
    }
}

/// Scale and translation of one axis of one scale level.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCoordinates {
    pub name: String,
    pub unit: Option<String>,
    pub scale: f64,
    pub translation: f64,
    pub len: u64,
}

impl AxisCoordinates {
    /// Physical coordinate of the centre of voxel `index`.
    pub fn at(&self, index: u64) -> f64 {
        self.translation + self.scale * index as f64
    }

    pub fn first(&self) -> f64 {
        self.translation
    }

    /// Coordinate of the last voxel. Equal to [`first`](Self::first) for empty axes.
    pub fn last(&self) -> f64 {
        self.at(self.len.saturating_sub(1))
    }
}

impl MultiscaleAttrs {
    /// Attributes of an empty z/y/x pyramid in nanometers.
    pub fn initialize() -> Self {
        let axes = ["z", "y", "x"]
            .into_iter()
            .map(|name| Axis {
                name: name.to_string(),
                axis_type: Some("space".to_string()),
                unit: Some("nanometer".to_string()),
            })
            .collect();
        Self {
            multiscales: vec![Multiscale {
                version: None,
                name: None,
                axes,
                datasets: Vec::new(),
                coordinate_transformations: Some(vec![CoordinateTransformation::scale(vec![
                    1.0, 1.0, 1.0,
                ])]),
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }

    /// Parse multiscale attributes out of a group's attribute map.
    pub fn from_attributes(attributes: &Map<String, Value>) -> Result<Self> {
        Ok(serde_json::from_value(Value::Object(attributes.clone()))?)
    }

    /// Write these attributes into an existing attribute map, keeping other keys.
    pub fn update_attributes(&self, attributes: &mut Map<String, Value>) -> Result<()> {
        let Value::Object(map) = serde_json::to_value(self)? else {
            return Err(Error::general("multiscale attributes must serialize to an object"));
        };
        attributes.extend(map);
        Ok(())
    }

    fn first(&self) -> Result<&Multiscale> {
        self.multiscales
            .first()
            .ok_or_else(|| Error::general("attributes contain an empty multiscales list"))
    }

    fn first_mut(&mut self) -> Result<&mut Multiscale> {
        self.multiscales
            .first_mut()
            .ok_or_else(|| Error::general("attributes contain an empty multiscales list"))
    }

    /// Add a scale level with the given scale and translation.
    ///
    /// A level already listed under the same path is replaced.
    pub fn add_scalelevel(
        &mut self,
        path: &str,
        scale: Vec<f64>,
        translation: Vec<f64>,
    ) -> Result<()> {
        let dataset = Dataset {
            path: path.to_string(),
            coordinate_transformations: vec![
                CoordinateTransformation::scale(scale),
                CoordinateTransformation::translation(translation),
            ],
            extra: Map::new(),
        };
        let multiscale = self.first_mut()?;
        match multiscale.datasets.iter_mut().find(|d| d.path == path) {
            Some(existing) => *existing = dataset,
            None => multiscale.datasets.push(dataset),
        }
        Ok(())
    }

    /// Reduce the pyramid to the single level `scalelvl`, renamed to `rename`.
    pub fn extract_single_scale(&mut self, scalelvl: &str, rename: &str) -> Result<()> {
        let multiscale = self.first_mut()?;
        let Some(mut dataset) = multiscale
            .datasets
            .iter()
            .find(|d| d.path == scalelvl)
            .cloned()
        else {
            return Err(Error::missing_scale_level(scalelvl, "attributes"));
        };
        dataset.path = rename.to_string();
        multiscale.datasets = vec![dataset];
        Ok(())
    }

    /// Scale and translation of the level `scalelvl`.
    pub fn scale_and_translation(&self, scalelvl: &str) -> Result<(Vec<f64>, Vec<f64>)> {
        let multiscale = self.first()?;
        let dataset = multiscale
            .datasets
            .iter()
            .find(|d| d.path == scalelvl)
            .ok_or_else(|| Error::missing_scale_level(scalelvl, "attributes"))?;
        let mut scale = None;
        let mut translation = None;
        for ct in &dataset.coordinate_transformations {
            match (ct, ct.values()?) {
                (CoordinateTransformation::Scale { .. }, Some(s)) => scale = Some(s.to_vec()),
                (CoordinateTransformation::Translation { .. }, Some(t)) => {
                    translation = Some(t.to_vec())
                }
                (other, _) => {
                    return Err(Error::general(format!(
                        "unknown coordinate transformation type for {scalelvl}: {}",
                        other.type_name()
                    )));
                }
            }
        }
        match (scale, translation) {
            (Some(s), Some(t)) => Ok((s, t)),
            (s, t) => Err(Error::general(format!(
                "did not find translation and scale for {scalelvl}: translation={t:?}, scale={s:?}"
            ))),
        }
    }

    /// Name of the level whose scale matches `scale`.
    pub fn scalelevel(&self, scale: &[f64]) -> Result<String> {
        for dataset in &self.first()?.datasets {
            let level_scale = dataset
                .coordinate_transformations
                .iter()
                .find_map(|ct| match ct {
                    CoordinateTransformation::Scale {
                        scale: Some(scale), ..
                    } => Some(scale),
                    _ => None,
                });
            if let Some(level_scale) = level_scale
                && level_scale.len() == scale.len()
                && level_scale
                    .iter()
                    .zip(scale)
                    .all(|(a, b)| (a - b).abs() <= SCALE_TOLERANCE * b.abs().max(1.0))
            {
                return Ok(dataset.path.clone());
            }
        }
        Err(Error::missing_scale_level(
            format!("with scale {scale:?}"),
            "attributes",
        ))
    }

    /// Whether any multiscale in these attributes references `path`.
    pub fn references(&self, path: &str) -> bool {
        self.multiscales
            .iter()
            .any(|m| m.datasets.iter().any(|d| d.path == path))
    }

    /// Per-axis coordinates of the level `path` with the given array shape.
    ///
    /// Dataset transformations are composed with the multiscale-level ones.
    pub fn axis_coordinates(&self, path: &str, shape: &[u64]) -> Result<Vec<AxisCoordinates>> {
        let (multiscale, dataset) = self
            .multiscales
            .iter()
            .find_map(|m| {
                let dataset = m.datasets.iter().find(|d| d.path == path)?;
                Some((m, dataset))
            })
            .ok_or_else(|| Error::missing_scale_level(path, "attributes"))?;
        let ndim = multiscale.axes.len();
        if ndim != shape.len() {
            return Err(Error::general(format!(
                "{} axes in metadata but array {path} has {} dimensions",
                ndim,
                shape.len()
            )));
        }
        let (scale, translation) = compose(&dataset.coordinate_transformations, ndim)?;
        let (global_scale, global_translation) = compose(
            multiscale.coordinate_transformations.as_deref().unwrap_or(&[]),
            ndim,
        )?;
        Ok(multiscale
            .axes
            .iter()
            .enumerate()
            .map(|(i, axis)| AxisCoordinates {
                name: axis.name.clone(),
                unit: axis.unit.clone(),
                scale: scale[i] * global_scale[i],
                translation: translation[i] * global_scale[i] + global_translation[i],
                len: shape[i],
            })
            .collect())
    }
}

/// Fold a list of transformations into a single scale and translation.
fn compose(transforms: &[CoordinateTransformation], ndim: usize) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut scale = vec![1.0; ndim];
    let mut translation = vec![0.0; ndim];
    for ct in transforms {
        let Some(values) = ct.values()? else {
            continue;
        };
        check_len(values, ndim)?;
        match ct {
            CoordinateTransformation::Identity => {}
            CoordinateTransformation::Scale { .. } => {
                for i in 0..ndim {
                    scale[i] *= values[i];
                    translation[i] *= values[i];
                }
            }
            CoordinateTransformation::Translation { .. } => {
                for i in 0..ndim {
                    translation[i] += values[i];
                }
            }
        }
    }
    Ok((scale, translation))
}

fn check_len(values: &[f64], ndim: usize) -> Result<()> {
    if values.len() != ndim {
        return Err(Error::general(format!(
            "coordinate transformation has {} elements, expected {ndim}",
            values.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs() -> MultiscaleAttrs {
        let mut attrs = MultiscaleAttrs::initialize();
        attrs
            .add_scalelevel("s0", vec![4.0, 4.0, 4.0], vec![2.0, 2.0, 2.0])
            .unwrap();
        attrs
            .add_scalelevel("s1", vec![8.0, 8.0, 8.0], vec![4.0, 4.0, 4.0])
            .unwrap();
        attrs
    }

    #[test]
    fn initialized_attributes_serialize_like_ome_ngff() {
        let value = serde_json::to_value(MultiscaleAttrs::initialize()).unwrap();
        assert_eq!(
            value,
            json!({
                "multiscales": [{
                    "axes": [
                        {"name": "z", "type": "space", "unit": "nanometer"},
                        {"name": "y", "type": "space", "unit": "nanometer"},
                        {"name": "x", "type": "space", "unit": "nanometer"},
                    ],
                    "coordinateTransformations": [{"type": "scale", "scale": [1.0, 1.0, 1.0]}],
                    "datasets": [],
                }]
            })
        );
    }

    #[test]
    fn add_scalelevel_replaces_existing_path() {
        let mut attrs = attrs();
        attrs
            .add_scalelevel("s1", vec![16.0, 16.0, 16.0], vec![0.0, 0.0, 0.0])
            .unwrap();
        assert_eq!(attrs.multiscales[0].datasets.len(), 2);
        assert_eq!(
            attrs.scale_and_translation("s1").unwrap(),
            (vec![16.0, 16.0, 16.0], vec![0.0, 0.0, 0.0])
        );
    }

    #[test]
    fn extract_single_scale_renames() {
        let mut attrs = attrs();
        attrs.extract_single_scale("s1", "s0").unwrap();
        assert_eq!(attrs.multiscales[0].datasets.len(), 1);
        assert_eq!(
            attrs.scale_and_translation("s0").unwrap(),
            (vec![8.0, 8.0, 8.0], vec![4.0, 4.0, 4.0])
        );
        assert!(matches!(
            attrs.extract_single_scale("s5", "s5"),
            Err(Error::MissingScaleLevel { .. })
        ));
    }

    #[test]
    fn scale_and_translation_requires_both() {
        let value = json!({
            "multiscales": [{
                "axes": [{"name": "x"}],
                "datasets": [
                    {
                        "path": "s0",
                        "coordinateTransformations": [{"type": "scale", "scale": [1.0]}],
                    },
                    {"path": "s1", "coordinateTransformations": [{"type": "identity"}]},
                ],
            }]
        });
        let attrs: MultiscaleAttrs = serde_json::from_value(value).unwrap();
        assert!(attrs.scale_and_translation("s0").is_err());
        assert!(attrs.scale_and_translation("s1").is_err());
        assert!(attrs.scale_and_translation("s2").is_err());
    }

    #[test]
    fn scalelevel_by_scale() {
        let attrs = attrs();
        assert_eq!(attrs.scalelevel(&[8.0, 8.0, 8.0]).unwrap(), "s1");
        assert!(attrs.scalelevel(&[2.0, 2.0, 2.0]).is_err());
    }

    #[test]
    fn coordinates_compose_global_transform() {
        let mut attrs = attrs();
        attrs.multiscales[0].coordinate_transformations =
            Some(vec![CoordinateTransformation::scale(vec![2.0, 1.0, 1.0])]);
        let coords = attrs.axis_coordinates("s0", &[3, 4, 5]).unwrap();
        assert_eq!(coords[0].scale, 8.0);
        assert_eq!(coords[0].translation, 4.0);
        assert_eq!(coords[1].last(), 2.0 + 4.0 * 3.0);
        assert_eq!(coords[2].name, "x");
        assert!(attrs.axis_coordinates("s0", &[3, 4]).is_err());
    }

    #[test]
    fn transformations_stored_at_a_path() {
        let value = json!({
            "multiscales": [{
                "axes": [{"name": "x"}],
                "datasets": [
                    {
                        "path": "s0",
                        "coordinateTransformations": [
                            {"type": "scale", "scale": [2.0]},
                            {"type": "translation", "translation": [1.0]},
                        ],
                        "note": "kept",
                    },
                    {
                        "path": "s1",
                        "coordinateTransformations": [{"type": "scale", "path": "scale.bin"}],
                    },
                ],
            }]
        });
        let attrs: MultiscaleAttrs = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(attrs.scale_and_translation("s0").unwrap(), (vec![2.0], vec![1.0]));
        assert!(matches!(
            attrs.axis_coordinates("s1", &[4]),
            Err(Error::NotImplemented(_))
        ));
        assert_eq!(serde_json::to_value(&attrs).unwrap(), value);
    }

    #[test]
    fn update_keeps_other_keys() {
        let mut map = Map::new();
        map.insert("cellmap".to_string(), json!({"annotation": {}}));
        attrs().update_attributes(&mut map).unwrap();
        assert!(map.contains_key("cellmap"));
        let parsed = MultiscaleAttrs::from_attributes(&map).unwrap();
        assert_eq!(parsed.multiscales, attrs().multiscales);
    }
}
