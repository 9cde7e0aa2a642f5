//!
//! Parameter decoding and reply encoding for the two codec families.
//!
//! The [`json`] codec is plain serde. The [`proto`] codec is the
//! schema-driven JSON variant: it accepts JSON-encoded values of
//! schema-defined types, tolerates unknown fields on decode, and on encode
//! emits fields even when unset, prefers numeric enum encodings and uses
//! schema-declared field names.
//!

pub mod json {
    //! Plain JSON codec (serde)

    use serde::{de::DeserializeOwned, Serialize};
    use serde_json::value::{to_raw_value, RawValue};

    pub fn decode_params<T>(raw: &RawValue) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(raw.get())
    }

    pub fn encode_reply<T>(reply: &T) -> Result<Box<RawValue>, serde_json::Error>
    where
        T: Serialize,
    {
        to_raw_value(reply)
    }
}

pub mod proto {
    //! Schema-driven JSON codec (protobuf descriptors)

    use crate::error::Error;
    use crate::result::Result;
    use prost_reflect::{
        DeserializeOptions, DynamicMessage, MessageDescriptor, ReflectMessage, SerializeOptions,
    };
    use serde_json::value::RawValue;

    fn deserialize_options() -> DeserializeOptions {
        DeserializeOptions::new().deny_unknown_fields(false)
    }

    fn serialize_options() -> SerializeOptions {
        SerializeOptions::new()
            .skip_default_fields(false)
            .use_enum_numbers(true)
            .use_proto_field_name(true)
    }

    pub fn decode_dynamic(desc: MessageDescriptor, raw: &RawValue) -> Result<DynamicMessage> {
        let mut de = serde_json::Deserializer::from_str(raw.get());
        let message = DynamicMessage::deserialize_with_options(desc, &mut de, &deserialize_options())?;
        de.end()?;
        Ok(message)
    }

    pub fn encode_dynamic(message: &DynamicMessage) -> Result<Box<RawValue>> {
        let mut buf = Vec::new();
        let mut serializer = serde_json::Serializer::new(&mut buf);
        message.serialize_with_options(&mut serializer, &serialize_options())?;
        let text = String::from_utf8(buf).map_err(|_| Error::ProtoEncoding)?;
        Ok(RawValue::from_string(text)?)
    }

    pub fn decode_params<T>(raw: &RawValue) -> Result<T>
    where
        T: ReflectMessage + Default,
    {
        let message = decode_dynamic(T::default().descriptor(), raw)?;
        Ok(message.transcode_to::<T>()?)
    }

    pub fn encode_reply<T>(reply: &T) -> Result<Box<RawValue>>
    where
        T: ReflectMessage,
    {
        encode_dynamic(&reply.transcode_to_dynamic())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::DescriptorPool;
    use serde_json::value::RawValue;

    fn sample_descriptor() -> prost_reflect::MessageDescriptor {
        let dir = std::env::temp_dir().join("uniport-codec-test");
        std::fs::create_dir_all(&dir).unwrap();
        let proto = dir.join("sample.proto");
        std::fs::write(
            &proto,
            r#"
syntax = "proto3";
package sample;

enum Mode {
  MODE_UNSPECIFIED = 0;
  MODE_FAST = 1;
}

message Item {
  string item_name = 1;
  int32 count = 2;
  Mode mode = 3;
}
"#,
        )
        .unwrap();
        let set = protox::compile([proto], [dir]).unwrap();
        let pool = DescriptorPool::from_file_descriptor_set(set).unwrap();
        pool.get_message_by_name("sample.Item").unwrap()
    }

    #[test]
    fn json_round_trip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Params {
            a: i64,
            b: i64,
        }
        let raw = RawValue::from_string(r#"{"a":100,"b":200}"#.to_string()).unwrap();
        let params: Params = json::decode_params(&raw).unwrap();
        assert_eq!(params, Params { a: 100, b: 200 });
        let reply = json::encode_reply(&300).unwrap();
        assert_eq!(reply.get(), "300");
    }

    #[test]
    fn schema_decode_tolerates_unknown_fields() {
        let desc = sample_descriptor();
        let raw =
            RawValue::from_string(r#"{"item_name":"x","count":3,"mystery":true}"#.to_string())
                .unwrap();
        let message = proto::decode_dynamic(desc, &raw).unwrap();
        let encoded = proto::encode_dynamic(&message).unwrap();
        let value: serde_json::Value = serde_json::from_str(encoded.get()).unwrap();
        assert_eq!(value["item_name"], "x");
        assert_eq!(value["count"], 3);
    }

    #[test]
    fn schema_encode_emits_unset_fields_numeric_enums_and_proto_names() {
        let desc = sample_descriptor();
        let raw = RawValue::from_string(r#"{"mode":"MODE_FAST"}"#.to_string()).unwrap();
        let message = proto::decode_dynamic(desc, &raw).unwrap();
        let encoded = proto::encode_dynamic(&message).unwrap();
        let value: serde_json::Value = serde_json::from_str(encoded.get()).unwrap();
        // unset fields are present, enums are numeric, names are schema-declared
        assert_eq!(value["item_name"], "");
        assert_eq!(value["count"], 0);
        assert_eq!(value["mode"], 1);
        assert!(value.get("itemName").is_none());
    }

    #[test]
    fn schema_decode_rejects_malformed_payload() {
        let desc = sample_descriptor();
        let raw = RawValue::from_string(r#"{"count":"not-a-number"}"#.to_string()).unwrap();
        assert!(proto::decode_dynamic(desc, &raw).is_err());
    }
}
