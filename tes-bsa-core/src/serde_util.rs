//! Serializers for listing types: identity hashes and flag words read better
//! as fixed-width hex than as decimal.

use serde::Serializer;

pub fn serialize_u32_hex<S>(value: &u32, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{value:08x}"))
}

pub fn serialize_u64_hex<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format!("{value:016x}"))
}

#[cfg(test)]
mod tests {
    use serde::Serialize;

    #[derive(Serialize)]
    struct Wrapped {
        #[serde(serialize_with = "super::serialize_u32_hex")]
        flags: u32,
        #[serde(serialize_with = "super::serialize_u64_hex")]
        hash: u64,
    }

    #[test]
    fn hex_fields_are_fixed_width() {
        let json = serde_json::to_string(&Wrapped {
            flags: 0x103,
            hash: 0x04BC_422C_742C_696C,
        })
        .unwrap();
        assert_eq!(json, r#"{"flags":"00000103","hash":"04bc422c742c696c"}"#);
    }
}
