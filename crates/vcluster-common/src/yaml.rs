//! Manifest document parsing using yaml-rust2
//!
//! Init manifests arrive as one multi-document YAML string. Each document is
//! converted to a `serde_json::Value` so it can be sent as a server-side apply
//! patch without an intermediate typed model.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Parse every non-empty document of a multi-document YAML string
///
/// Documents that are empty or only comments (`null` after parsing) are
/// dropped, so `---` separators around the content are harmless.
pub fn parse_documents(input: &str) -> Result<Vec<Value>, Error> {
    let docs = YamlLoader::load_from_str(input)
        .map_err(|e| Error::serialization(format!("invalid YAML: {}", e)))?;

    let mut values = Vec::with_capacity(docs.len());
    for doc in docs {
        let value = yaml_to_json(doc)?;
        if !value.is_null() {
            values.push(value);
        }
    }
    Ok(values)
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e| Error::serialization(format!("invalid float {:?}: {}", s, e)))?;
            Ok(Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(items) => items
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| Ok((yaml_key(k)?, yaml_to_json(v)?)))
            .collect::<Result<Map<String, Value>, Error>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::serialization("YAML aliases are not supported")),
        Yaml::BadValue => Err(Error::serialization("bad YAML value")),
    }
}

fn yaml_key(key: Yaml) -> Result<String, Error> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(Error::serialization("unsupported YAML key type")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multiple_documents_and_skips_empty_ones() {
        let input = r#"
---
apiVersion: v1
kind: Namespace
metadata:
  name: team-a
---
# only a comment
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: settings
  namespace: team-a
data:
  replicas: "3"
"#;
        let docs = parse_documents(input).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["kind"], "Namespace");
        assert_eq!(docs[1]["metadata"]["namespace"], "team-a");
        assert_eq!(docs[1]["data"]["replicas"], "3");
    }

    #[test]
    fn empty_input_yields_no_documents() {
        assert!(parse_documents("").unwrap().is_empty());
    }

    #[test]
    fn scalars_keep_their_types() {
        let docs = parse_documents("a: 1\nb: true\nc: 1.5\nd: ~").unwrap();
        assert_eq!(docs[0]["a"], 1);
        assert_eq!(docs[0]["b"], true);
        assert_eq!(docs[0]["c"], 1.5);
        assert!(docs[0]["d"].is_null());
    }

    #[test]
    fn invalid_yaml_is_a_serialization_error() {
        let err = parse_documents("key: [unclosed").unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
    }
}
