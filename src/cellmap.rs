//! Cellmap annotation attributes.
//!
//! Label groups carry `cellmap.annotation.class_names`; label arrays carry the
//! annotation type with its value encoding and the `complement_counts`
//! (number of voxels which are not `present`).
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result};

pub const CELLMAP_KEY: &str = "cellmap";
pub const SEMANTIC_SEGMENTATION: &str = "semantic_segmentation";

static CROP_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"crop\d+").expect("valid"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellmapAttrs {
    pub annotation: Annotation,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    /// Present on label groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_names: Option<Vec<String>>,
    /// Present on label arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation_type: Option<AnnotationType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complement_counts: Option<ComplementCounts>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationType {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<Encoding>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Integer values representing each annotation state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoding {
    pub present: i64,
    pub absent: i64,
    pub unknown: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Voxel counts for the states other than `present`.
///
/// Counts of smoothed labels may be fractional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplementCounts {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "count::serialize"
    )]
    pub absent: Option<f64>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "count::serialize"
    )]
    pub unknown: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Serialize whole counts as JSON integers.
mod count {
    use serde::Serializer;

    pub fn serialize<S: Serializer>(value: &Option<f64>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => {
                serializer.serialize_i64(*v as i64)
            }
            Some(v) => serializer.serialize_f64(*v),
            None => serializer.serialize_none(),
        }
    }
}

impl Encoding {
    /// The larger of the `present` and `absent` values.
    pub fn max_annotated(&self) -> f64 {
        self.present.max(self.absent) as f64
    }

    /// Binarisation threshold between `absent` and `present`.
    pub fn midpoint(&self) -> f64 {
        (self.present as f64 + self.absent as f64) / 2.0
    }
}

impl CellmapAttrs {
    /// Read the `cellmap` entry of an attribute map.
    ///
    /// Accepts both structured values and JSON strings.
    pub fn from_attributes(attributes: &Map<String, Value>) -> Result<Self> {
        let value = attributes
            .get(CELLMAP_KEY)
            .ok_or_else(|| Error::general("attributes have no cellmap entry"))?;
        Ok(serde_json::from_value(access_attributes(value))?)
    }

    pub fn update_attributes(&self, attributes: &mut Map<String, Value>) -> Result<()> {
        attributes.insert(CELLMAP_KEY.to_string(), serde_json::to_value(self)?);
        Ok(())
    }

    /// Label names listed on a label group.
    pub fn class_names(&self) -> Result<&[String]> {
        self.annotation
            .class_names
            .as_deref()
            .ok_or_else(|| Error::general("annotation attributes have no class_names"))
    }

    pub fn annotation_type(&self) -> Result<&AnnotationType> {
        self.annotation
            .annotation_type
            .as_ref()
            .ok_or_else(|| Error::general("annotation attributes have no annotation_type"))
    }

    pub fn encoding(&self) -> Result<&Encoding> {
        self.annotation_type()?
            .encoding
            .as_ref()
            .ok_or_else(|| Error::general("annotation type has no encoding"))
    }

    /// Overwrite both complement counts, keeping any other keys.
    pub fn set_complement_counts(&mut self, absent: f64, unknown: f64) {
        let counts = self
            .annotation
            .complement_counts
            .get_or_insert_with(|| ComplementCounts {
                absent: None,
                unknown: None,
                extra: Map::new(),
            });
        counts.absent = Some(absent);
        counts.unknown = Some(unknown);
    }
}

/// Decode attributes which were stored as JSON strings, as in exported HDF5 files.
///
/// Structured values are returned unchanged, as are strings which are not JSON.
pub fn access_attributes(value: &Value) -> Value {
    match value {
        Value::String(s) => serde_json::from_str(s).unwrap_or_else(|_| value.clone()),
        other => other.clone(),
    }
}

/// Check that downsampling by 2 in 3D keeps unknown voxels unknown.
pub fn check_encoding(encoding: &Encoding) -> Result<()> {
    let bound = encoding.present.max(encoding.absent).checked_mul(8);
    if bound.is_none_or(|bound| encoding.unknown <= bound) {
        return Err(Error::InvalidEncoding(format!(
            "smoothing relies on a large value for unknown, \
             got unknown={} with present={} and absent={}",
            encoding.unknown, encoding.present, encoding.absent
        )));
    }
    Ok(())
}

/// First occurrence of `crop` followed by digits.
pub fn extract_crop_name(path: &str) -> Option<&str> {
    CROP_NAME.find(path).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn array_attrs() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "cellmap": {
                "annotation": {
                    "annotation_type": {
                        "type": "semantic_segmentation",
                        "encoding": {"present": 1, "absent": 0, "unknown": 255},
                    },
                    "complement_counts": {"absent": 10, "unknown": 2},
                    "method": "manual",
                }
            },
            "other": true,
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn parse_and_update_keep_unknown_keys() {
        let mut attributes = array_attrs();
        let mut attrs = CellmapAttrs::from_attributes(&attributes).unwrap();
        assert_eq!(attrs.annotation_type().unwrap().kind, SEMANTIC_SEGMENTATION);
        assert_eq!(attrs.encoding().unwrap().unknown, 255);
        assert!(attrs.class_names().is_err());

        attrs.set_complement_counts(3.5, 4.0);
        attrs.update_attributes(&mut attributes).unwrap();
        assert_eq!(
            attributes["cellmap"]["annotation"]["complement_counts"],
            json!({"absent": 3.5, "unknown": 4})
        );
        assert_eq!(attributes["cellmap"]["annotation"]["method"], json!("manual"));
        assert_eq!(attributes["other"], json!(true));
    }

    #[test]
    fn json_string_attributes() {
        let encoded = Value::String(json!({"annotation": {"class_names": ["mito"]}}).to_string());
        let mut attributes = Map::new();
        attributes.insert(CELLMAP_KEY.to_string(), encoded);
        let attrs = CellmapAttrs::from_attributes(&attributes).unwrap();
        assert_eq!(attrs.class_names().unwrap(), ["mito".to_string()]);

        assert_eq!(access_attributes(&json!("plain")), json!("plain"));
        assert_eq!(access_attributes(&json!([1, 2])), json!([1, 2]));
    }

    #[test]
    fn encoding_must_leave_room_for_unknown() {
        let attrs = CellmapAttrs::from_attributes(&array_attrs()).unwrap();
        check_encoding(attrs.encoding().unwrap()).unwrap();

        let tight = Encoding {
            present: 1,
            absent: 0,
            unknown: 8,
            extra: Map::new(),
        };
        assert!(matches!(check_encoding(&tight), Err(Error::InvalidEncoding(_))));
        assert_eq!(tight.midpoint(), 0.5);

        let huge = Encoding {
            present: i64::MAX / 2,
            absent: 0,
            unknown: i64::MAX,
            extra: Map::new(),
        };
        assert!(matches!(check_encoding(&huge), Err(Error::InvalidEncoding(_))));
    }

    #[test]
    fn crop_names() {
        assert_eq!(extract_crop_name("/data/crop12.zarr/labels"), Some("crop12"));
        assert_eq!(extract_crop_name("/data/crop1/crop2"), Some("crop1"));
        assert_eq!(extract_crop_name("/data/cropx"), None);
    }
}
