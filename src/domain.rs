use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::HarvestError;

/// Numeric key of one grant-call record (convocatoria) in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BdnsId(u64);

impl BdnsId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BdnsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BdnsId {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let parsed = trimmed
            .parse::<u64>()
            .map_err(|_| HarvestError::InvalidBdnsId(value.to_string()))?;
        if parsed == 0 {
            return Err(HarvestError::InvalidBdnsId(value.to_string()));
        }
        Ok(Self(parsed))
    }
}

/// One entry of a nested catalog list (instrument, beneficiary type,
/// sector, region). The registry sometimes encodes `codigo` as a number.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogRef {
    #[serde(default, deserialize_with = "string_or_number")]
    pub codigo: Option<String>,
    #[serde(default)]
    pub descripcion: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Organo {
    #[serde(default)]
    pub nivel1: Option<String>,
    #[serde(default)]
    pub nivel2: Option<String>,
    #[serde(default)]
    pub nivel3: Option<String>,
}

/// Raw API payload for one convocatoria. Every scalar is optional; the
/// validation step in `flatten` decides whether the record is usable.
/// Nested lists deserialize leniently: a list of the wrong JSON shape
/// becomes an empty list instead of rejecting the whole payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrantRecord {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(rename = "codigoBDNS", default, deserialize_with = "id_number")]
    pub codigo_bdns: Option<u64>,
    #[serde(rename = "fechaRecepcion", default)]
    pub fecha_recepcion: Option<String>,
    #[serde(rename = "sedeElectronica", default)]
    pub sede_electronica: Option<String>,
    #[serde(rename = "tipoConvocatoria", default)]
    pub tipo_convocatoria: Option<String>,
    #[serde(rename = "presupuestoTotal", default)]
    pub presupuesto_total: Option<f64>,
    #[serde(default)]
    pub mrr: Option<bool>,
    #[serde(default)]
    pub descripcion: Option<String>,
    #[serde(rename = "descripcionLeng", default)]
    pub descripcion_leng: Option<String>,
    #[serde(rename = "descripcionFinalidad", default)]
    pub descripcion_finalidad: Option<String>,
    #[serde(rename = "descripcionBasesReguladoras", default)]
    pub descripcion_bases_reguladoras: Option<String>,
    #[serde(rename = "urlBasesReguladoras", default)]
    pub url_bases_reguladoras: Option<String>,
    #[serde(rename = "sePublicaDiarioOficial", default)]
    pub se_publica_diario_oficial: Option<bool>,
    #[serde(default)]
    pub abierto: Option<bool>,
    #[serde(rename = "fechaInicioSolicitud", default)]
    pub fecha_inicio_solicitud: Option<String>,
    #[serde(rename = "fechaFinSolicitud", default)]
    pub fecha_fin_solicitud: Option<String>,
    #[serde(rename = "textInicio", default)]
    pub text_inicio: Option<String>,
    #[serde(rename = "textFin", default)]
    pub text_fin: Option<String>,
    #[serde(default)]
    pub organo: Option<Organo>,
    #[serde(default, deserialize_with = "lenient_refs")]
    pub instrumentos: Vec<CatalogRef>,
    #[serde(rename = "tiposBeneficiarios", default, deserialize_with = "lenient_refs")]
    pub tipos_beneficiarios: Vec<CatalogRef>,
    #[serde(default, deserialize_with = "lenient_refs")]
    pub sectores: Vec<CatalogRef>,
    #[serde(default, deserialize_with = "lenient_refs")]
    pub regiones: Vec<CatalogRef>,
}

/// One denormalized row of a year partition. Scalar fields repeat across
/// all rows produced from the same record; the four list-derived fields
/// carry the Cartesian combination the row stands for.
#[derive(Debug, Clone, PartialEq)]
pub struct FlattenedRow {
    pub id: Option<u64>,
    pub codigo_bdns: u64,
    pub fecha_recepcion: NaiveDate,
    pub sede_electronica: Option<String>,
    pub tipo_convocatoria: Option<String>,
    pub presupuesto_total: Option<f64>,
    pub mrr: Option<bool>,
    pub descripcion: Option<String>,
    pub descripcion_leng: Option<String>,
    pub descripcion_finalidad: Option<String>,
    pub descripcion_bases_reguladoras: Option<String>,
    pub url_bases_reguladoras: Option<String>,
    pub se_publica_diario_oficial: Option<bool>,
    pub abierto: Option<bool>,
    pub fecha_inicio_solicitud: Option<NaiveDate>,
    pub fecha_fin_solicitud: Option<NaiveDate>,
    pub text_inicio: Option<String>,
    pub text_fin: Option<String>,
    pub organo_nivel1: Option<String>,
    pub organo_nivel2: Option<String>,
    pub organo_nivel3: Option<String>,
    pub year: i32,
    pub instrumento: Option<String>,
    pub tipo_beneficiario: Option<String>,
    pub sector: Option<String>,
    pub sector_codigo: Option<String>,
    pub region: Option<String>,
}

impl FlattenedRow {
    pub fn bdns_id(&self) -> BdnsId {
        BdnsId::new(self.codigo_bdns)
    }

    /// Canonical encoding of the complete field tuple. Two rows are
    /// duplicates exactly when their keys match.
    pub fn dedup_key(&self) -> String {
        fn opt<T: fmt::Display>(value: &Option<T>) -> String {
            value
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default()
        }

        [
            opt(&self.id),
            self.codigo_bdns.to_string(),
            self.fecha_recepcion.to_string(),
            opt(&self.sede_electronica),
            opt(&self.tipo_convocatoria),
            opt(&self.presupuesto_total),
            opt(&self.mrr),
            opt(&self.descripcion),
            opt(&self.descripcion_leng),
            opt(&self.descripcion_finalidad),
            opt(&self.descripcion_bases_reguladoras),
            opt(&self.url_bases_reguladoras),
            opt(&self.se_publica_diario_oficial),
            opt(&self.abierto),
            opt(&self.fecha_inicio_solicitud),
            opt(&self.fecha_fin_solicitud),
            opt(&self.text_inicio),
            opt(&self.text_fin),
            opt(&self.organo_nivel1),
            opt(&self.organo_nivel2),
            opt(&self.organo_nivel3),
            self.year.to_string(),
            opt(&self.instrumento),
            opt(&self.tipo_beneficiario),
            opt(&self.sector),
            opt(&self.sector_codigo),
            opt(&self.region),
        ]
        .join("\u{1f}")
    }
}

/// Dates arrive as ISO-8601 day strings.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").ok()
}

pub fn year_of(date: NaiveDate) -> i32 {
    date.year()
}

fn id_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_refs<'de, D>(deserializer: D) -> Result<Vec<CatalogRef>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_bdns_id_valid() {
        let id: BdnsId = " 747573 ".parse().unwrap();
        assert_eq!(id.value(), 747573);
        assert_eq!(id.next().value(), 747574);
    }

    #[test]
    fn parse_bdns_id_invalid() {
        let err = "74a573".parse::<BdnsId>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidBdnsId(_));
        let err = "0".parse::<BdnsId>().unwrap_err();
        assert_matches!(err, HarvestError::InvalidBdnsId(_));
    }

    #[test]
    fn record_accepts_string_encoded_code() {
        let record: GrantRecord =
            serde_json::from_str(r#"{"codigoBDNS": "747573", "fechaRecepcion": "2024-03-01"}"#)
                .unwrap();
        assert_eq!(record.codigo_bdns, Some(747573));
    }

    #[test]
    fn malformed_nested_list_becomes_empty() {
        let record: GrantRecord = serde_json::from_str(
            r#"{"codigoBDNS": 1, "sectores": "Educación", "regiones": [{"descripcion": "ANDALUCIA"}]}"#,
        )
        .unwrap();
        assert!(record.sectores.is_empty());
        assert_eq!(record.regiones.len(), 1);
        assert_eq!(record.regiones[0].descripcion.as_deref(), Some("ANDALUCIA"));
    }

    #[test]
    fn numeric_sector_code_is_kept_as_text() {
        let record: GrantRecord =
            serde_json::from_str(r#"{"sectores": [{"codigo": 54, "descripcion": "Cultura"}]}"#)
                .unwrap();
        assert_eq!(record.sectores[0].codigo.as_deref(), Some("54"));
    }

    #[test]
    fn date_parsing_and_year() {
        let date = parse_date("2023-10-05").unwrap();
        assert_eq!(year_of(date), 2023);
        assert!(parse_date("05/10/2023").is_none());
    }
}
