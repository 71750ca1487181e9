/// Block payloads: the closed set of events recorded on the chain.
///
/// Persisted shape is internally tagged by `type` with camelCase fields,
/// e.g. `{"type":"inference","modelId":"m1","inputHash":"..."}`.
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A model was registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRegistration {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// A model produced an output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inference {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// RFC 3339 execution time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<String>,
}

/// A registered model changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUpdate {
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockPayload {
    ModelRegistration(ModelRegistration),
    Inference(Inference),
    ModelUpdate(ModelUpdate),
}

impl BlockPayload {
    /// The subject identifier every variant carries.
    pub fn subject_id(&self) -> &str {
        match self {
            BlockPayload::ModelRegistration(p) => &p.model_id,
            BlockPayload::Inference(p) => &p.model_id,
            BlockPayload::ModelUpdate(p) => &p.model_id,
        }
    }

    /// The persisted `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            BlockPayload::ModelRegistration(_) => "model_registration",
            BlockPayload::Inference(_) => "inference",
            BlockPayload::ModelUpdate(_) => "model_update",
        }
    }
}

impl From<ModelRegistration> for BlockPayload {
    fn from(p: ModelRegistration) -> Self {
        BlockPayload::ModelRegistration(p)
    }
}

impl From<Inference> for BlockPayload {
    fn from(p: Inference) -> Self {
        BlockPayload::Inference(p)
    }
}

impl From<ModelUpdate> for BlockPayload {
    fn from(p: ModelUpdate) -> Self {
        BlockPayload::ModelUpdate(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_shape() {
        let p: BlockPayload = ModelRegistration {
            model_id: "m1".into(),
            version: Some("1.0.0".into()),
            ..Default::default()
        }
        .into();

        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(
            v,
            json!({"type": "model_registration", "modelId": "m1", "version": "1.0.0"})
        );
    }

    #[test]
    fn test_parse_persisted_inference() {
        let raw = json!({
            "type": "inference",
            "modelId": "iris",
            "inputHash": "aa",
            "outputHash": "bb",
            "params": {"temperature": 0.2}
        });
        let p: BlockPayload = serde_json::from_value(raw).unwrap();
        assert_eq!(p.subject_id(), "iris");
        assert_eq!(p.kind(), "inference");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = json!({"type": "deletion", "modelId": "m1"});
        assert!(serde_json::from_value::<BlockPayload>(raw).is_err());
    }
}
