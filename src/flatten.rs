use crate::domain::{CatalogRef, FlattenedRow, GrantRecord, parse_date, year_of};
use crate::error::HarvestError;

/// Validate one record and expand it into the Cartesian product of its
/// four nested lists. An empty list contributes a single placeholder
/// entry, so every accepted record produces at least one row.
pub fn flatten(record: &GrantRecord) -> Result<Vec<FlattenedRow>, HarvestError> {
    let codigo_bdns = record.codigo_bdns.ok_or_else(|| HarvestError::MalformedRecord {
        id: record
            .id
            .map(|v| v.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        reason: "missing codigoBDNS".to_string(),
    })?;

    let fecha_recepcion = record
        .fecha_recepcion
        .as_deref()
        .and_then(parse_date)
        .ok_or_else(|| HarvestError::MalformedRecord {
            id: codigo_bdns.to_string(),
            reason: "missing or unparseable fechaRecepcion".to_string(),
        })?;
    let year = year_of(fecha_recepcion);

    let organo = record.organo.clone().unwrap_or_default();
    let base = FlattenedRow {
        id: record.id,
        codigo_bdns,
        fecha_recepcion,
        sede_electronica: record.sede_electronica.clone(),
        tipo_convocatoria: record.tipo_convocatoria.clone(),
        presupuesto_total: record.presupuesto_total,
        mrr: record.mrr,
        descripcion: record.descripcion.clone(),
        descripcion_leng: record.descripcion_leng.clone(),
        descripcion_finalidad: record.descripcion_finalidad.clone(),
        descripcion_bases_reguladoras: record.descripcion_bases_reguladoras.clone(),
        url_bases_reguladoras: record.url_bases_reguladoras.clone(),
        se_publica_diario_oficial: record.se_publica_diario_oficial,
        abierto: record.abierto,
        fecha_inicio_solicitud: record
            .fecha_inicio_solicitud
            .as_deref()
            .and_then(parse_date),
        fecha_fin_solicitud: record.fecha_fin_solicitud.as_deref().and_then(parse_date),
        text_inicio: record.text_inicio.clone(),
        text_fin: record.text_fin.clone(),
        organo_nivel1: organo.nivel1,
        organo_nivel2: organo.nivel2,
        organo_nivel3: organo.nivel3,
        year,
        instrumento: None,
        tipo_beneficiario: None,
        sector: None,
        sector_codigo: None,
        region: None,
    };

    let instrumentos = or_placeholder(&record.instrumentos);
    let beneficiarios = or_placeholder(&record.tipos_beneficiarios);
    let sectores = or_placeholder(&record.sectores);
    let regiones = or_placeholder(&record.regiones);

    let mut rows =
        Vec::with_capacity(instrumentos.len() * beneficiarios.len() * sectores.len() * regiones.len());
    for inst in &instrumentos {
        for benef in &beneficiarios {
            for sector in &sectores {
                for region in &regiones {
                    let mut row = base.clone();
                    row.instrumento = inst.descripcion.clone();
                    row.tipo_beneficiario = benef.descripcion.clone();
                    row.sector = sector.descripcion.clone();
                    row.sector_codigo = sector.codigo.clone();
                    row.region = region.descripcion.clone();
                    rows.push(row);
                }
            }
        }
    }

    Ok(rows)
}

fn or_placeholder(list: &[CatalogRef]) -> Vec<CatalogRef> {
    if list.is_empty() {
        vec![CatalogRef::default()]
    } else {
        list.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use assert_matches::assert_matches;

    use super::*;
    use crate::domain::GrantRecord;

    fn record(json: &str) -> GrantRecord {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn rejects_record_without_code() {
        let err = flatten(&record(r#"{"fechaRecepcion": "2024-01-01"}"#)).unwrap_err();
        assert_matches!(err, HarvestError::MalformedRecord { .. });
    }

    #[test]
    fn rejects_record_without_reception_date() {
        let err = flatten(&record(r#"{"codigoBDNS": 12345}"#)).unwrap_err();
        assert_matches!(err, HarvestError::MalformedRecord { .. });
    }

    #[test]
    fn empty_lists_still_yield_one_row() {
        let rows = flatten(&record(
            r#"{"codigoBDNS": 12345, "fechaRecepcion": "2024-01-01"}"#,
        ))
        .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].year, 2024);
        assert!(rows[0].instrumento.is_none());
        assert!(rows[0].region.is_none());
    }

    #[test]
    fn cartesian_row_count() {
        let rows = flatten(&record(
            r#"{
                "codigoBDNS": 1, "fechaRecepcion": "2023-06-15",
                "instrumentos": [{"descripcion": "a"}, {"descripcion": "b"}],
                "tiposBeneficiarios": [{"descripcion": "x"}, {"descripcion": "y"}, {"descripcion": "z"}],
                "sectores": [{"descripcion": "s"}],
                "regiones": []
            }"#,
        ))
        .unwrap();
        assert_eq!(rows.len(), 2 * 3 * 1 * 1);
        assert!(rows.iter().all(|row| row.codigo_bdns == 1));
        assert!(rows.iter().all(|row| row.sector.as_deref() == Some("s")));
    }

    #[test]
    fn two_sectors_expand_to_two_rows() {
        let rows = flatten(&record(
            r#"{
                "codigoBDNS": 12345, "fechaRecepcion": "2024-02-02",
                "instrumentos": [{"descripcion": "Subvención"}],
                "sectores": [{"descripcion": "Educación"}, {"descripcion": "Cultura"}],
                "tiposBeneficiarios": [],
                "regiones": [{"descripcion": "VALENCIANA"}]
            }"#,
        ))
        .unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.codigo_bdns, 12345);
            assert_eq!(row.instrumento.as_deref(), Some("Subvención"));
            assert_eq!(row.region.as_deref(), Some("VALENCIANA"));
            assert!(row.tipo_beneficiario.is_none());
        }
        let sectors: BTreeSet<_> = rows.iter().map(|row| row.sector.clone().unwrap()).collect();
        assert_eq!(sectors.len(), 2);
        assert!(sectors.contains("Educación"));
        assert!(sectors.contains("Cultura"));
    }

    #[test]
    fn flattening_preserves_list_values() {
        let rows = flatten(&record(
            r#"{
                "codigoBDNS": 7, "fechaRecepcion": "2022-12-31",
                "instrumentos": [{"descripcion": "i1"}, {"descripcion": "i2"}],
                "regiones": [{"descripcion": "r1"}, {"descripcion": "r2"}, {"descripcion": "r3"}]
            }"#,
        ))
        .unwrap();
        let instruments: BTreeSet<_> = rows.iter().filter_map(|r| r.instrumento.clone()).collect();
        let regions: BTreeSet<_> = rows.iter().filter_map(|r| r.region.clone()).collect();
        assert_eq!(instruments, BTreeSet::from(["i1".into(), "i2".into()]));
        assert_eq!(
            regions,
            BTreeSet::from(["r1".into(), "r2".into(), "r3".into()])
        );
    }
}
