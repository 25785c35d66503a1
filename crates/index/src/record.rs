//! Index rows and their parquet encoding.

use crate::error::{IndexError, IndexResult};
use arrow::array::{ArrayRef, Int64Array, StringArray, TimestampSecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::sync::Arc;
use time::OffsetDateTime;

/// One row of the dedup index.
///
/// (file_hash, bucket_name) is unique: the index maps content in a bucket to
/// the first path it was stored at.
#[derive(Clone, Debug, PartialEq)]
pub struct FileRecord {
    /// 64 lowercase hex chars.
    pub file_hash: String,
    /// Final object key.
    pub file_path: String,
    pub bucket_name: String,
    /// Filename as received from the client.
    pub original_name: String,
    pub content_type: String,
    pub file_size: i64,
    /// Second precision; sub-second digits are dropped on save.
    pub uploaded_at: OffsetDateTime,
}

/// Arrow schema of the index file.
fn index_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("file_hash", DataType::Utf8, false),
        Field::new("file_path", DataType::Utf8, false),
        Field::new("bucket_name", DataType::Utf8, false),
        Field::new("original_name", DataType::Utf8, false),
        Field::new("content_type", DataType::Utf8, false),
        Field::new("file_size", DataType::Int64, false),
        Field::new(
            "uploaded_at",
            DataType::Timestamp(TimeUnit::Second, None),
            false,
        ),
    ]))
}

/// Serialize records to a Snappy-compressed parquet blob.
pub fn encode_records(records: &[FileRecord]) -> IndexResult<Bytes> {
    let schema = index_schema();

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.file_hash.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.file_path.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.bucket_name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.original_name.as_str()),
        )),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.content_type.as_str()),
        )),
        Arc::new(Int64Array::from_iter_values(
            records.iter().map(|r| r.file_size),
        )),
        Arc::new(TimestampSecondArray::from_iter_values(
            records.iter().map(|r| r.uploaded_at.unix_timestamp()),
        )),
    ];

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut buf = Vec::new();
    let mut writer = ArrowWriter::try_new(&mut buf, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(Bytes::from(buf))
}

/// Deserialize records from a parquet blob.
pub fn decode_records(data: Bytes) -> IndexResult<Vec<FileRecord>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;
    let reader = builder.build()?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch?;
        append_batch(&batch, &mut records)?;
    }
    Ok(records)
}

fn append_batch(batch: &RecordBatch, records: &mut Vec<FileRecord>) -> IndexResult<()> {
    let file_hash = string_column(batch, 0, "file_hash")?;
    let file_path = string_column(batch, 1, "file_path")?;
    let bucket_name = string_column(batch, 2, "bucket_name")?;
    let original_name = string_column(batch, 3, "original_name")?;
    let content_type = string_column(batch, 4, "content_type")?;
    let file_size = batch
        .column(5)
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| IndexError::InvalidRecord("file_size is not int64".to_string()))?;
    let uploaded_at = batch
        .column(6)
        .as_any()
        .downcast_ref::<TimestampSecondArray>()
        .ok_or_else(|| {
            IndexError::InvalidRecord("uploaded_at is not a second timestamp".to_string())
        })?;

    for row in 0..batch.num_rows() {
        let uploaded_at = OffsetDateTime::from_unix_timestamp(uploaded_at.value(row))
            .map_err(|e| IndexError::InvalidRecord(format!("bad uploaded_at: {e}")))?;
        records.push(FileRecord {
            file_hash: file_hash.value(row).to_string(),
            file_path: file_path.value(row).to_string(),
            bucket_name: bucket_name.value(row).to_string(),
            original_name: original_name.value(row).to_string(),
            content_type: content_type.value(row).to_string(),
            file_size: file_size.value(row),
            uploaded_at,
        });
    }
    Ok(())
}

fn string_column<'a>(
    batch: &'a RecordBatch,
    index: usize,
    name: &str,
) -> IndexResult<&'a StringArray> {
    batch
        .column(index)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| IndexError::InvalidRecord(format!("{name} is not utf8")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample(hash: &str, bucket: &str, path: &str) -> FileRecord {
        FileRecord {
            file_hash: hash.to_string(),
            file_path: path.to_string(),
            bucket_name: bucket.to_string(),
            original_name: "a.txt".to_string(),
            content_type: "text/plain".to_string(),
            file_size: 5,
            uploaded_at: datetime!(2025-06-01 12:00:00 UTC),
        }
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let records = vec![
            sample(&"aa".repeat(32), "b1", "x/a.txt"),
            sample(&"bb".repeat(32), "b2", "b.txt"),
        ];

        let blob = encode_records(&records).unwrap();
        let decoded = decode_records(blob).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn test_encode_decode_empty() {
        let blob = encode_records(&[]).unwrap();
        let decoded = decode_records(blob).unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_timestamp_is_second_precision() {
        let mut record = sample(&"cc".repeat(32), "b1", "c.txt");
        record.uploaded_at = datetime!(2025-06-01 12:00:00.7 UTC);

        let decoded = decode_records(encode_records(&[record]).unwrap()).unwrap();
        assert_eq!(decoded[0].uploaded_at, datetime!(2025-06-01 12:00:00 UTC));
    }
}
