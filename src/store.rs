use std::collections::HashSet;
use std::fs::{self, File};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray, UInt64Array,
};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use camino::{Utf8Path, Utf8PathBuf};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{BdnsId, FlattenedRow, parse_date};
use crate::error::HarvestError;

const PARTITION_PREFIX: &str = "bdns_";
const PARTITION_EXT: &str = "parquet";

/// Year-partitioned parquet store under a single data directory, one
/// file per calendar year. Rewrites are whole-file and atomic: the new
/// content lands in a sibling temp file that is renamed over the target,
/// so an interrupted write never truncates an existing partition.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    data_dir: Utf8PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct DedupReport {
    pub year: i32,
    pub rows_before: usize,
    pub rows_after: usize,
}

impl PartitionStore {
    pub fn new(data_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Utf8Path {
        &self.data_dir
    }

    pub fn partition_path(&self, year: i32) -> Utf8PathBuf {
        self.data_dir
            .join(format!("{PARTITION_PREFIX}{year}.{PARTITION_EXT}"))
    }

    /// Years with an existing partition file, ascending.
    pub fn list_years(&self) -> Result<Vec<i32>, HarvestError> {
        if !self.data_dir.as_std_path().exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(self.data_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        let mut years = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| HarvestError::Filesystem(err.to_string()))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(year) = partition_year(name) {
                years.push(year);
            }
        }
        years.sort_unstable();
        Ok(years)
    }

    /// Merge `rows` into the partition for `year`, dropping full-row
    /// duplicates, and atomically replace the file.
    pub fn append(&self, year: i32, rows: &[FlattenedRow]) -> Result<(), HarvestError> {
        if rows.is_empty() {
            return Ok(());
        }
        let path = self.partition_path(year);
        let mut combined = if path.as_std_path().exists() {
            self.read_partition(&path)?
        } else {
            Vec::new()
        };
        let before = combined.len();
        combined.extend(rows.iter().cloned());
        let combined = dedup_rows(combined);
        self.write_partition(&path, &combined)?;
        info!(
            year,
            appended = combined.len() - before,
            total = combined.len(),
            "partition updated"
        );
        Ok(())
    }

    /// Concatenation of the requested partitions, or of every available
    /// one when `years` is `None`. `DataUnavailable` when nothing exists.
    pub fn load(&self, years: Option<&[i32]>) -> Result<Vec<FlattenedRow>, HarvestError> {
        let available = self.list_years()?;
        let selected: Vec<i32> = match years {
            Some(years) => available
                .iter()
                .copied()
                .filter(|year| years.contains(year))
                .collect(),
            None => available,
        };
        if selected.is_empty() {
            return Err(HarvestError::DataUnavailable(self.data_dir.clone()));
        }
        let mut rows = Vec::new();
        for year in selected {
            rows.extend(self.read_partition(&self.partition_path(year))?);
        }
        Ok(rows)
    }

    /// Drop full-row duplicates from one partition. Running it twice is
    /// the same as running it once.
    pub fn deduplicate(&self, year: i32) -> Result<DedupReport, HarvestError> {
        let path = self.partition_path(year);
        if !path.as_std_path().exists() {
            return Err(HarvestError::PartitionMissing(path));
        }
        let rows = self.read_partition(&path)?;
        let rows_before = rows.len();
        let rows = dedup_rows(rows);
        let rows_after = rows.len();
        if rows_after < rows_before {
            self.write_partition(&path, &rows)?;
        }
        Ok(DedupReport {
            year,
            rows_before,
            rows_after,
        })
    }

    /// Every identifier present across all partitions. Empty when no
    /// partition exists; feeds the resume cursor and the progress report.
    pub fn bdns_ids(&self) -> Result<Vec<BdnsId>, HarvestError> {
        let mut ids = Vec::new();
        for year in self.list_years()? {
            let rows = self.read_partition(&self.partition_path(year))?;
            ids.extend(rows.iter().map(FlattenedRow::bdns_id));
        }
        Ok(ids)
    }

    fn read_partition(&self, path: &Utf8Path) -> Result<Vec<FlattenedRow>, HarvestError> {
        let read_err = |message: String| HarvestError::PartitionRead {
            path: path.to_owned(),
            message,
        };
        let file = File::open(path.as_std_path()).map_err(|err| read_err(err.to_string()))?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|err| read_err(err.to_string()))?
            .build()
            .map_err(|err| read_err(err.to_string()))?;

        let mut rows = Vec::new();
        for batch in reader {
            let batch = batch.map_err(|err| read_err(err.to_string()))?;
            rows.extend(batch_to_rows(&batch, path)?);
        }
        debug!(%path, rows = rows.len(), "partition loaded");
        Ok(rows)
    }

    fn write_partition(&self, path: &Utf8Path, rows: &[FlattenedRow]) -> Result<(), HarvestError> {
        let write_err = |message: String| HarvestError::PartitionWrite {
            path: path.to_owned(),
            message,
        };
        fs::create_dir_all(self.data_dir.as_std_path())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;

        let schema = partition_schema();
        let batch = rows_to_batch(schema.clone(), rows).map_err(&write_err)?;

        let tmp_path = path.with_extension(format!("{PARTITION_EXT}.tmp"));
        let file =
            File::create(tmp_path.as_std_path()).map_err(|err| write_err(err.to_string()))?;
        let mut writer =
            ArrowWriter::try_new(file, schema, None).map_err(|err| write_err(err.to_string()))?;
        writer.write(&batch).map_err(|err| write_err(err.to_string()))?;
        writer.close().map_err(|err| write_err(err.to_string()))?;

        fs::rename(tmp_path.as_std_path(), path.as_std_path())
            .map_err(|err| write_err(err.to_string()))?;
        Ok(())
    }
}

/// Keep the first occurrence of each complete field tuple. The key spans
/// every column, not just the identifier: one identifier legitimately
/// owns several distinct Cartesian rows.
pub fn dedup_rows(rows: Vec<FlattenedRow>) -> Vec<FlattenedRow> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.into_iter()
        .filter(|row| seen.insert(row.dedup_key()))
        .collect()
}

fn partition_year(file_name: &str) -> Option<i32> {
    let stem = file_name
        .strip_prefix(PARTITION_PREFIX)?
        .strip_suffix(&format!(".{PARTITION_EXT}"))?;
    stem.parse().ok()
}

fn partition_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::UInt64, true),
        Field::new("codigoBDNS", DataType::UInt64, false),
        Field::new("fechaRecepcion", DataType::Utf8, false),
        Field::new("sedeElectronica", DataType::Utf8, true),
        Field::new("tipoConvocatoria", DataType::Utf8, true),
        Field::new("presupuestoTotal", DataType::Float64, true),
        Field::new("mrr", DataType::Boolean, true),
        Field::new("descripcion", DataType::Utf8, true),
        Field::new("descripcionLeng", DataType::Utf8, true),
        Field::new("descripcionFinalidad", DataType::Utf8, true),
        Field::new("descripcionBasesReguladoras", DataType::Utf8, true),
        Field::new("urlBasesReguladoras", DataType::Utf8, true),
        Field::new("sePublicaDiarioOficial", DataType::Boolean, true),
        Field::new("abierto", DataType::Boolean, true),
        Field::new("fechaInicioSolicitud", DataType::Utf8, true),
        Field::new("fechaFinSolicitud", DataType::Utf8, true),
        Field::new("textInicio", DataType::Utf8, true),
        Field::new("textFin", DataType::Utf8, true),
        Field::new("organo_nivel1", DataType::Utf8, true),
        Field::new("organo_nivel2", DataType::Utf8, true),
        Field::new("organo_nivel3", DataType::Utf8, true),
        Field::new("year", DataType::Int32, false),
        Field::new("instrumento_descripcion", DataType::Utf8, true),
        Field::new("tipoBeneficiario_descripcion", DataType::Utf8, true),
        Field::new("sector_descripcion", DataType::Utf8, true),
        Field::new("sector_codigo", DataType::Utf8, true),
        Field::new("region_descripcion", DataType::Utf8, true),
    ]))
}

fn rows_to_batch(schema: SchemaRef, rows: &[FlattenedRow]) -> Result<RecordBatch, String> {
    fn utf8<F>(rows: &[FlattenedRow], get: F) -> ArrayRef
    where
        F: Fn(&FlattenedRow) -> Option<String>,
    {
        Arc::new(rows.iter().map(get).collect::<StringArray>())
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(rows.iter().map(|r| r.id).collect::<UInt64Array>()),
        Arc::new(
            rows.iter()
                .map(|r| Some(r.codigo_bdns))
                .collect::<UInt64Array>(),
        ),
        utf8(rows, |r| Some(r.fecha_recepcion.to_string())),
        utf8(rows, |r| r.sede_electronica.clone()),
        utf8(rows, |r| r.tipo_convocatoria.clone()),
        Arc::new(
            rows.iter()
                .map(|r| r.presupuesto_total)
                .collect::<Float64Array>(),
        ),
        Arc::new(rows.iter().map(|r| r.mrr).collect::<BooleanArray>()),
        utf8(rows, |r| r.descripcion.clone()),
        utf8(rows, |r| r.descripcion_leng.clone()),
        utf8(rows, |r| r.descripcion_finalidad.clone()),
        utf8(rows, |r| r.descripcion_bases_reguladoras.clone()),
        utf8(rows, |r| r.url_bases_reguladoras.clone()),
        Arc::new(
            rows.iter()
                .map(|r| r.se_publica_diario_oficial)
                .collect::<BooleanArray>(),
        ),
        Arc::new(rows.iter().map(|r| r.abierto).collect::<BooleanArray>()),
        utf8(rows, |r| r.fecha_inicio_solicitud.map(|d| d.to_string())),
        utf8(rows, |r| r.fecha_fin_solicitud.map(|d| d.to_string())),
        utf8(rows, |r| r.text_inicio.clone()),
        utf8(rows, |r| r.text_fin.clone()),
        utf8(rows, |r| r.organo_nivel1.clone()),
        utf8(rows, |r| r.organo_nivel2.clone()),
        utf8(rows, |r| r.organo_nivel3.clone()),
        Arc::new(rows.iter().map(|r| Some(r.year)).collect::<Int32Array>()),
        utf8(rows, |r| r.instrumento.clone()),
        utf8(rows, |r| r.tipo_beneficiario.clone()),
        utf8(rows, |r| r.sector.clone()),
        utf8(rows, |r| r.sector_codigo.clone()),
        utf8(rows, |r| r.region.clone()),
    ];

    RecordBatch::try_new(schema, columns).map_err(|err| err.to_string())
}

fn batch_to_rows(batch: &RecordBatch, path: &Utf8Path) -> Result<Vec<FlattenedRow>, HarvestError> {
    let read_err = |message: String| HarvestError::PartitionRead {
        path: path.to_owned(),
        message,
    };

    fn column<'a, T: 'static>(
        batch: &'a RecordBatch,
        name: &str,
    ) -> Result<&'a T, String> {
        batch
            .column_by_name(name)
            .ok_or_else(|| format!("missing column {name}"))?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| format!("unexpected type for column {name}"))
    }

    fn opt_str(arr: &StringArray, i: usize) -> Option<String> {
        (!arr.is_null(i)).then(|| arr.value(i).to_string())
    }

    fn opt_bool(arr: &BooleanArray, i: usize) -> Option<bool> {
        (!arr.is_null(i)).then(|| arr.value(i))
    }

    let id = column::<UInt64Array>(batch, "id").map_err(&read_err)?;
    let codigo_bdns = column::<UInt64Array>(batch, "codigoBDNS").map_err(&read_err)?;
    let fecha_recepcion = column::<StringArray>(batch, "fechaRecepcion").map_err(&read_err)?;
    let sede_electronica = column::<StringArray>(batch, "sedeElectronica").map_err(&read_err)?;
    let tipo_convocatoria = column::<StringArray>(batch, "tipoConvocatoria").map_err(&read_err)?;
    let presupuesto_total =
        column::<Float64Array>(batch, "presupuestoTotal").map_err(&read_err)?;
    let mrr = column::<BooleanArray>(batch, "mrr").map_err(&read_err)?;
    let descripcion = column::<StringArray>(batch, "descripcion").map_err(&read_err)?;
    let descripcion_leng = column::<StringArray>(batch, "descripcionLeng").map_err(&read_err)?;
    let descripcion_finalidad =
        column::<StringArray>(batch, "descripcionFinalidad").map_err(&read_err)?;
    let descripcion_bases =
        column::<StringArray>(batch, "descripcionBasesReguladoras").map_err(&read_err)?;
    let url_bases = column::<StringArray>(batch, "urlBasesReguladoras").map_err(&read_err)?;
    let se_publica =
        column::<BooleanArray>(batch, "sePublicaDiarioOficial").map_err(&read_err)?;
    let abierto = column::<BooleanArray>(batch, "abierto").map_err(&read_err)?;
    let fecha_inicio = column::<StringArray>(batch, "fechaInicioSolicitud").map_err(&read_err)?;
    let fecha_fin = column::<StringArray>(batch, "fechaFinSolicitud").map_err(&read_err)?;
    let text_inicio = column::<StringArray>(batch, "textInicio").map_err(&read_err)?;
    let text_fin = column::<StringArray>(batch, "textFin").map_err(&read_err)?;
    let organo_nivel1 = column::<StringArray>(batch, "organo_nivel1").map_err(&read_err)?;
    let organo_nivel2 = column::<StringArray>(batch, "organo_nivel2").map_err(&read_err)?;
    let organo_nivel3 = column::<StringArray>(batch, "organo_nivel3").map_err(&read_err)?;
    let year = column::<Int32Array>(batch, "year").map_err(&read_err)?;
    let instrumento =
        column::<StringArray>(batch, "instrumento_descripcion").map_err(&read_err)?;
    let tipo_beneficiario =
        column::<StringArray>(batch, "tipoBeneficiario_descripcion").map_err(&read_err)?;
    let sector = column::<StringArray>(batch, "sector_descripcion").map_err(&read_err)?;
    let sector_codigo = column::<StringArray>(batch, "sector_codigo").map_err(&read_err)?;
    let region = column::<StringArray>(batch, "region_descripcion").map_err(&read_err)?;

    let mut rows = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let reception = parse_date(fecha_recepcion.value(i)).ok_or_else(|| {
            read_err(format!(
                "unparseable fechaRecepcion {:?}",
                fecha_recepcion.value(i)
            ))
        })?;
        rows.push(FlattenedRow {
            id: (!id.is_null(i)).then(|| id.value(i)),
            codigo_bdns: codigo_bdns.value(i),
            fecha_recepcion: reception,
            sede_electronica: opt_str(sede_electronica, i),
            tipo_convocatoria: opt_str(tipo_convocatoria, i),
            presupuesto_total: (!presupuesto_total.is_null(i))
                .then(|| presupuesto_total.value(i)),
            mrr: opt_bool(mrr, i),
            descripcion: opt_str(descripcion, i),
            descripcion_leng: opt_str(descripcion_leng, i),
            descripcion_finalidad: opt_str(descripcion_finalidad, i),
            descripcion_bases_reguladoras: opt_str(descripcion_bases, i),
            url_bases_reguladoras: opt_str(url_bases, i),
            se_publica_diario_oficial: opt_bool(se_publica, i),
            abierto: opt_bool(abierto, i),
            fecha_inicio_solicitud: opt_str(fecha_inicio, i).and_then(|v| parse_date(&v)),
            fecha_fin_solicitud: opt_str(fecha_fin, i).and_then(|v| parse_date(&v)),
            text_inicio: opt_str(text_inicio, i),
            text_fin: opt_str(text_fin, i),
            organo_nivel1: opt_str(organo_nivel1, i),
            organo_nivel2: opt_str(organo_nivel2, i),
            organo_nivel3: opt_str(organo_nivel3, i),
            year: year.value(i),
            instrumento: opt_str(instrumento, i),
            tipo_beneficiario: opt_str(tipo_beneficiario, i),
            sector: opt_str(sector, i),
            sector_codigo: opt_str(sector_codigo, i),
            region: opt_str(region, i),
        });
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_layout() {
        let store = PartitionStore::new("data");
        assert_eq!(store.partition_path(2024), "data/bdns_2024.parquet");
    }

    #[test]
    fn partition_year_round_trip() {
        assert_eq!(partition_year("bdns_2023.parquet"), Some(2023));
        assert_eq!(partition_year("bdns_2023.parquet.tmp"), None);
        assert_eq!(partition_year("notes.txt"), None);
    }
}
