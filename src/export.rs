use std::fs::File;
use std::io::Write;

use camino::Utf8Path;

use crate::domain::FlattenedRow;
use crate::error::HarvestError;

pub const CSV_HEADER: [&str; 27] = [
    "id",
    "codigoBDNS",
    "fechaRecepcion",
    "sedeElectronica",
    "tipoConvocatoria",
    "presupuestoTotal",
    "mrr",
    "descripcion",
    "descripcionLeng",
    "descripcionFinalidad",
    "descripcionBasesReguladoras",
    "urlBasesReguladoras",
    "sePublicaDiarioOficial",
    "abierto",
    "fechaInicioSolicitud",
    "fechaFinSolicitud",
    "textInicio",
    "textFin",
    "organo_nivel1",
    "organo_nivel2",
    "organo_nivel3",
    "year",
    "instrumento_descripcion",
    "tipoBeneficiario_descripcion",
    "sector_descripcion",
    "sector_codigo",
    "region_descripcion",
];

/// Write the given rows as CSV, header first, columns in partition
/// order.
pub fn write_csv<W: Write>(writer: W, rows: &[FlattenedRow]) -> Result<(), HarvestError> {
    let to_err = |err: csv::Error| HarvestError::ExportFailed(err.to_string());
    let mut writer = csv::Writer::from_writer(writer);
    writer.write_record(CSV_HEADER).map_err(to_err)?;
    for row in rows {
        writer.write_record(fields(row)).map_err(to_err)?;
    }
    writer
        .flush()
        .map_err(|err| HarvestError::ExportFailed(err.to_string()))?;
    Ok(())
}

pub fn export_to_path(path: &Utf8Path, rows: &[FlattenedRow]) -> Result<(), HarvestError> {
    let file = File::create(path.as_std_path())
        .map_err(|err| HarvestError::ExportFailed(err.to_string()))?;
    write_csv(file, rows)
}

fn fields(row: &FlattenedRow) -> Vec<String> {
    fn opt<T: std::fmt::Display>(value: &Option<T>) -> String {
        value.as_ref().map(|v| v.to_string()).unwrap_or_default()
    }

    vec![
        opt(&row.id),
        row.codigo_bdns.to_string(),
        row.fecha_recepcion.to_string(),
        opt(&row.sede_electronica),
        opt(&row.tipo_convocatoria),
        opt(&row.presupuesto_total),
        opt(&row.mrr),
        opt(&row.descripcion),
        opt(&row.descripcion_leng),
        opt(&row.descripcion_finalidad),
        opt(&row.descripcion_bases_reguladoras),
        opt(&row.url_bases_reguladoras),
        opt(&row.se_publica_diario_oficial),
        opt(&row.abierto),
        opt(&row.fecha_inicio_solicitud),
        opt(&row.fecha_fin_solicitud),
        opt(&row.text_inicio),
        opt(&row.text_fin),
        opt(&row.organo_nivel1),
        opt(&row.organo_nivel2),
        opt(&row.organo_nivel3),
        row.year.to_string(),
        opt(&row.instrumento),
        opt(&row.tipo_beneficiario),
        opt(&row.sector),
        opt(&row.sector_codigo),
        opt(&row.region),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten;

    #[test]
    fn csv_has_header_and_quotes_embedded_commas() {
        let record = serde_json::from_str(
            r#"{"codigoBDNS": 42, "fechaRecepcion": "2024-01-15", "descripcion": "Ayudas, becas y premios"}"#,
        )
        .unwrap();
        let rows = flatten(&record).unwrap();
        let mut buffer = Vec::new();
        write_csv(&mut buffer, &rows).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("id,codigoBDNS,fechaRecepcion"));
        let data = lines.next().unwrap();
        assert!(data.contains("\"Ayudas, becas y premios\""));
        assert!(data.contains("2024-01-15"));
    }
}
