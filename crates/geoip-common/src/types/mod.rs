//! Common types used across the GeoIP loader

use serde::{Deserialize, Serialize};

use crate::checksum::range_id;
use crate::error::{RecordError, Result};

/// Number of positional fields in a geo-IP input line
pub const FIELD_COUNT: usize = 11;

/// A geo-IP range line as read from the input, before normalization
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub start_ip: String,
    pub end_ip: String,
    pub country: String,
    pub region: String,
    pub region_code: String,
    pub city: String,
    pub city_code: String,
    pub conn_speed: String,
    pub isp: String,
    pub mobile_carrier: String,
    pub mobile_carrier_code: String,
}

impl RawRecord {
    /// Build a record from exactly [`FIELD_COUNT`] positional fields
    pub fn from_fields<I, S>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields: Vec<String> = fields.into_iter().map(|f| f.as_ref().to_string()).collect();
        let actual = fields.len();
        let [start_ip, end_ip, country, region, region_code, city, city_code, conn_speed, isp, mobile_carrier, mobile_carrier_code]: [String; FIELD_COUNT] =
            fields
                .try_into()
                .map_err(|_| RecordError::field_count(FIELD_COUNT, actual))?;

        Ok(Self {
            start_ip,
            end_ip,
            country,
            region,
            region_code,
            city,
            city_code,
            conn_speed,
            isp,
            mobile_carrier,
            mobile_carrier_code,
        })
    }

    /// Normalize into an indexable document keyed by its range identifier
    pub fn into_document(self) -> Document {
        let id = range_id(&self.start_ip, &self.end_ip);

        Document {
            id,
            ip_address: IpRange {
                start: self.start_ip,
                end: self.end_ip,
            },
            country: self.country,
            region: self.region,
            region_code: self.region_code,
            city: self.city,
            city_code: self.city_code,
            conn_speed: self.conn_speed,
            isp: self.isp,
            mobile_carrier: self.mobile_carrier,
            mobile_carrier_code: self.mobile_carrier_code,
        }
    }
}

/// Inclusive IP range, serialized as a range query body (`gte`/`lte`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpRange {
    #[serde(rename = "gte")]
    pub start: String,
    #[serde(rename = "lte")]
    pub end: String,
}

/// Normalized, identifier-bearing record ready for indexing.
///
/// The identifier is carried out of band (as the bulk `_id`), so it is not
/// part of the serialized body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(skip)]
    pub id: String,
    pub ip_address: IpRange,
    pub country: String,
    pub region: String,
    pub region_code: String,
    pub city: String,
    pub city_code: String,
    pub conn_speed: String,
    pub isp: String,
    pub mobile_carrier: String,
    pub mobile_carrier_code: String,
}

impl Document {
    /// Restore the positional record this document was built from
    pub fn to_record(&self) -> RawRecord {
        RawRecord {
            start_ip: self.ip_address.start.clone(),
            end_ip: self.ip_address.end.clone(),
            country: self.country.clone(),
            region: self.region.clone(),
            region_code: self.region_code.clone(),
            city: self.city.clone(),
            city_code: self.city_code.clone(),
            conn_speed: self.conn_speed.clone(),
            isp: self.isp.clone(),
            mobile_carrier: self.mobile_carrier.clone(),
            mobile_carrier_code: self.mobile_carrier_code.clone(),
        }
    }

    /// Render as a delimited line in input field order
    pub fn to_line(&self, delimiter: char) -> String {
        let r = self.to_record();
        let separator = delimiter.to_string();
        [
            r.start_ip,
            r.end_ip,
            r.country,
            r.region,
            r.region_code,
            r.city,
            r.city_code,
            r.conn_speed,
            r.isp,
            r.mobile_carrier,
            r.mobile_carrier_code,
        ]
        .join(separator.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn fields(start: &str, end: &str, country: &str) -> Vec<String> {
        let mut f = vec![start.to_string(), end.to_string(), country.to_string()];
        f.extend(["region", "rc", "city", "cc", "cable", "isp", "carrier", "mcc"].map(String::from));
        f
    }

    #[test]
    fn test_from_fields_positional_mapping() {
        let record = RawRecord::from_fields(fields("10.0.0.0", "10.0.0.255", "us")).unwrap();
        assert_eq!(record.start_ip, "10.0.0.0");
        assert_eq!(record.end_ip, "10.0.0.255");
        assert_eq!(record.country, "us");
        assert_eq!(record.region, "region");
        assert_eq!(record.region_code, "rc");
        assert_eq!(record.city, "city");
        assert_eq!(record.city_code, "cc");
        assert_eq!(record.conn_speed, "cable");
        assert_eq!(record.isp, "isp");
        assert_eq!(record.mobile_carrier, "carrier");
        assert_eq!(record.mobile_carrier_code, "mcc");
    }

    #[test]
    fn test_from_fields_wrong_count() {
        let err = RawRecord::from_fields(["1.0.0.0", "1.0.0.255"]).unwrap_err();
        assert_eq!(err, RecordError::field_count(FIELD_COUNT, 2));

        let mut too_many = fields("1.0.0.0", "1.0.0.255", "us");
        too_many.push("extra".to_string());
        assert!(RawRecord::from_fields(too_many).is_err());
    }

    #[test]
    fn test_identifier_ignores_descriptive_fields() {
        let a = RawRecord::from_fields(fields("1.0.0.0", "1.0.0.255", "us"))
            .unwrap()
            .into_document();
        let b = RawRecord::from_fields(fields("1.0.0.0", "1.0.0.255", "de"))
            .unwrap()
            .into_document();
        let c = RawRecord::from_fields(fields("1.0.1.0", "1.0.1.255", "us"))
            .unwrap()
            .into_document();

        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_document_json_shape() {
        let doc = RawRecord::from_fields(fields("10.0.0.0", "10.0.0.255", "us"))
            .unwrap()
            .into_document();
        let json = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["ip_address"]["gte"], "10.0.0.0");
        assert_eq!(json["ip_address"]["lte"], "10.0.0.255");
        assert_eq!(json["country"], "us");
        assert_eq!(json["mobile_carrier_code"], "mcc");
        assert!(json.get("id").is_none());
    }

    #[test]
    fn test_to_record_restores_input() {
        let record = RawRecord::from_fields(fields("10.0.0.0", "10.0.0.255", "us")).unwrap();
        let doc = record.clone().into_document();
        assert_eq!(doc.to_record(), record);
        assert_eq!(
            doc.to_line(';'),
            "10.0.0.0;10.0.0.255;us;region;rc;city;cc;cable;isp;carrier;mcc"
        );
    }
}
