//! OpenSearch-style storage engine.
//!
//! Documents carry their attributes as top-level string fields, each vector
//! field as a `knn_vector` with a sibling `{field}_pipeline_version` long,
//! plus two bookkeeping fields used for stable enumeration:
//!
//! | Field | Type | Content |
//! |-------|------|---------|
//! | `record_id` | keyword | the record id |
//! | `record_partition` | long | blake3 partition key |
//!
//! Pages are read with `search_after` sorted on
//! `[record_partition, record_id]`, so slicing is a range filter on
//! `record_partition` and cursors survive restarts.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use semvec_core::{Error, Record, RecordFilter, Result, StoredVector};

use crate::engine::{
    Cursor, NearestQuery, ReadRequest, RecordPage, ScoredRecord, StorageEngine, UpdateOutcome,
    VectorFieldSchema, VectorUpdate,
};
use crate::slice::partition_key;

const SERVICE: &str = "storage";
const ID_FIELD: &str = "record_id";
const PARTITION_FIELD: &str = "record_partition";
const VERSION_SUFFIX: &str = "_pipeline_version";

/// Storage engine reached over the OpenSearch REST API.
pub struct HttpStorageEngine {
    base_url: String,
    index: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpStorageEngine {
    /// Creates a new engine for `index` at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        index: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let index = index.into();
        if index.is_empty() {
            return Err(Error::config("storage index name must not be empty"));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("failed to build storage client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index,
            timeout,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.index, path)
    }

    /// `_doc/{id}` with the id percent-encoded as a single path segment.
    fn doc_url(&self, id: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url("_doc"))
            .map_err(|e| Error::config(format!("invalid storage url {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|()| Error::config(format!("storage url {} has no path", self.base_url)))?
            .push(id);
        Ok(url)
    }

    fn classify_transport(&self, err: reqwest::Error) -> Error {
        if err.is_timeout() {
            Error::timeout(
                SERVICE,
                u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            )
        } else if err.is_decode() {
            Error::malformed(SERVICE, err.to_string())
        } else {
            Error::unavailable(SERVICE, err.to_string())
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        if status.is_server_error() || status.as_u16() == 429 {
            Err(Error::unavailable(SERVICE, format!("status {status}: {detail}")))
        } else if status.as_u16() == 404 {
            Err(Error::not_found(format!("{}: {detail}", self.index)))
        } else {
            Err(Error::storage(format!("status {status}: {detail}")))
        }
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(|e| self.classify_transport(e))
    }

    async fn index_exists(&self) -> Result<bool> {
        let response = self
            .client
            .head(format!("{}/{}", self.base_url, self.index))
            .send()
            .await
            .map_err(|e| self.classify_transport(e))?;
        match response.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            s if s >= 500 => Err(Error::unavailable(SERVICE, format!("status {s}"))),
            s => Err(Error::storage(format!("unexpected status {s} checking index"))),
        }
    }
}

/// Mapping properties for a vector field and its bookkeeping fields.
pub fn vector_mapping(schema: &VectorFieldSchema) -> Value {
    let mut method = json!({
        "name": "hnsw",
        "space_type": "cosinesimil",
        "engine": "lucene",
    });
    if let (Some(method), Some(options)) =
        (method.as_object_mut(), schema.index_options.as_object())
    {
        for (k, v) in options {
            method.insert(k.clone(), v.clone());
        }
    }

    let mut properties = Map::new();
    properties.insert(
        schema.field.clone(),
        json!({ "type": "knn_vector", "dimension": schema.dimension, "method": method }),
    );
    properties.insert(
        format!("{}{VERSION_SUFFIX}", schema.field),
        json!({ "type": "long" }),
    );
    properties.insert(ID_FIELD.to_string(), json!({ "type": "keyword" }));
    properties.insert(PARTITION_FIELD.to_string(), json!({ "type": "long" }));
    json!({ "properties": properties })
}

/// Translate a record filter into query DSL.
pub fn filter_query(filter: &RecordFilter) -> Value {
    match filter {
        RecordFilter::All => json!({ "match_all": {} }),
        RecordFilter::Term { field, value } => {
            json!({ "term": { format!("{field}.keyword"): value } })
        }
        RecordFilter::Exists { field } => json!({ "exists": { "field": field } }),
        RecordFilter::Missing { field } => {
            json!({ "bool": { "must_not": [ { "exists": { "field": field } } ] } })
        }
        RecordFilter::StaleVector { field, version } => json!({
            "bool": { "must_not": [ { "term": { format!("{field}{VERSION_SUFFIX}"): version } } ] }
        }),
        RecordFilter::And { filters } => json!({
            "bool": { "filter": filters.iter().map(filter_query).collect::<Vec<_>>() }
        }),
    }
}

fn document(record: &Record) -> Value {
    let mut doc = Map::new();
    for (name, value) in &record.attributes {
        doc.insert(name.clone(), Value::String(value.clone()));
    }
    for (field, vector) in &record.vectors {
        doc.insert(field.clone(), json!(vector.values));
        doc.insert(
            format!("{field}{VERSION_SUFFIX}"),
            json!(vector.pipeline_version),
        );
    }
    doc.insert(ID_FIELD.to_string(), json!(record.id));
    doc.insert(PARTITION_FIELD.to_string(), json!(partition_key(&record.id)));
    Value::Object(doc)
}

/// Rebuild a record from a `_source` document.
pub fn record_from_source(id: &str, source: &Value) -> Result<Record> {
    let doc = source
        .as_object()
        .ok_or_else(|| Error::malformed(SERVICE, format!("_source of '{id}' is not an object")))?;

    let mut record = Record::new(id);
    for (name, value) in doc {
        if name == ID_FIELD || name == PARTITION_FIELD || name.ends_with(VERSION_SUFFIX) {
            continue;
        }
        match value {
            Value::String(text) => {
                record.attributes.insert(name.clone(), text.clone());
            }
            Value::Array(items) => {
                let version = doc
                    .get(&format!("{name}{VERSION_SUFFIX}"))
                    .and_then(Value::as_u64);
                if let Some(version) = version {
                    let values = items
                        .iter()
                        .map(|v| v.as_f64().map(|f| f as f32))
                        .collect::<Option<Vec<f32>>>()
                        .ok_or_else(|| {
                            Error::malformed(SERVICE, format!("vector '{name}' is not numeric"))
                        })?;
                    record
                        .vectors
                        .insert(name.clone(), StoredVector::new(values, version));
                }
            }
            _ => {}
        }
    }
    Ok(record)
}

fn source_fields(fields: &[String]) -> Value {
    if fields.is_empty() {
        Value::Bool(true)
    } else {
        let mut includes: Vec<String> = fields.to_vec();
        includes.push(ID_FIELD.to_string());
        json!(includes)
    }
}

fn attributes_only(record: Record, fields: &[String]) -> Record {
    Record {
        attributes: record.project(fields),
        vectors: BTreeMap::new(),
        id: record.id,
    }
}

#[async_trait]
impl StorageEngine for HttpStorageEngine {
    async fn declare_vector_field(&self, schema: &VectorFieldSchema) -> Result<()> {
        if schema.dimension == 0 {
            return Err(Error::validation("vector dimension must be positive"));
        }
        let mapping = vector_mapping(schema);
        if self.index_exists().await? {
            debug!("updating mapping of {} for {}", self.index, schema.field);
            self.send(self.client.put(self.url("_mapping")).json(&mapping))
                .await?;
        } else {
            debug!("creating index {} with field {}", self.index, schema.field);
            let body = json!({ "settings": { "index": { "knn": true } }, "mappings": mapping });
            self.send(
                self.client
                    .put(format!("{}/{}", self.base_url, self.index))
                    .json(&body),
            )
            .await?;
        }
        Ok(())
    }

    async fn put_record(&self, record: &Record) -> Result<()> {
        if record.id.is_empty() {
            return Err(Error::validation("record id must not be empty"));
        }
        self.send(
            self.client
                .put(self.doc_url(&record.id)?)
                .json(&document(record)),
        )
        .await?;
        Ok(())
    }

    async fn get_record(&self, id: &str) -> Result<Option<Record>> {
        let body = match self
            .send_json(self.client.get(self.doc_url(id)?))
            .await
        {
            Ok(body) => body,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        if body.get("found").and_then(Value::as_bool) == Some(false) {
            return Ok(None);
        }
        let source = body
            .get("_source")
            .ok_or_else(|| Error::malformed(SERVICE, "document without _source"))?;
        record_from_source(id, source).map(Some)
    }

    async fn read_batch(&self, request: &ReadRequest) -> Result<RecordPage> {
        if request.limit == 0 {
            return Err(Error::validation("read limit must be positive"));
        }

        let mut clauses = vec![filter_query(&request.filter)];
        if let Some(slice) = &request.slice {
            clauses.push(json!({
                "range": { PARTITION_FIELD: { "gte": slice.start(), "lt": slice.end() } }
            }));
        }

        let mut body = json!({
            "size": request.limit,
            "query": { "bool": { "filter": clauses } },
            "sort": [ { PARTITION_FIELD: "asc" }, { ID_FIELD: "asc" } ],
            "_source": source_fields(&request.fields),
        });
        if let Some(raw) = &request.cursor {
            let cursor = Cursor::decode(raw)?;
            body["search_after"] = json!([cursor.partition, cursor.id]);
        }

        let response = self
            .send_json(self.client.post(self.url("_search")).json(&body))
            .await?;
        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::malformed(SERVICE, "search response without hits"))?;

        let mut records = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::malformed(SERVICE, "hit without _id"))?;
            let source = hit.get("_source").cloned().unwrap_or_else(|| json!({}));
            records.push(attributes_only(
                record_from_source(id, &source)?,
                &request.fields,
            ));
        }

        let next_cursor = records.last().map(|r| Cursor::after(r.id.clone()).encode());
        Ok(RecordPage {
            has_more: records.len() == request.limit,
            records,
            next_cursor,
        })
    }

    async fn update_vectors(&self, updates: &[VectorUpdate]) -> Result<Vec<UpdateOutcome>> {
        if updates.is_empty() {
            return Ok(Vec::new());
        }

        let mut ndjson = String::new();
        for update in updates {
            let action = json!({ "update": { "_id": update.id } });
            let doc = json!({
                "doc": {
                    update.field.clone(): update.vector.values,
                    format!("{}{VERSION_SUFFIX}", update.field): update.vector.pipeline_version,
                }
            });
            ndjson.push_str(&action.to_string());
            ndjson.push('\n');
            ndjson.push_str(&doc.to_string());
            ndjson.push('\n');
        }

        let response = self
            .send_json(
                self.client
                    .post(self.url("_bulk"))
                    .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
                    .body(ndjson),
            )
            .await?;

        let items = response
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::malformed(SERVICE, "bulk response without items"))?;
        if items.len() != updates.len() {
            return Err(Error::malformed(
                SERVICE,
                format!("bulk returned {} items for {} updates", items.len(), updates.len()),
            ));
        }

        Ok(updates
            .iter()
            .zip(items)
            .map(|(update, item)| match item.pointer("/update/error") {
                Some(error) => UpdateOutcome::failed(
                    &update.id,
                    error
                        .get("reason")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                ),
                None => UpdateOutcome::ok(&update.id),
            })
            .collect())
    }

    async fn nearest(&self, query: &NearestQuery) -> Result<Vec<ScoredRecord>> {
        let body = json!({
            "size": query.k,
            "query": {
                "knn": { query.field.clone(): { "vector": query.vector, "k": query.candidates } }
            },
            "_source": source_fields(&query.projection),
        });
        let response = self
            .send_json(self.client.post(self.url("_search")).json(&body))
            .await?;
        let hits = response
            .pointer("/hits/hits")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::malformed(SERVICE, "search response without hits"))?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let id = hit
                .get("_id")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::malformed(SERVICE, "hit without _id"))?;
            let score = hit.get("_score").and_then(Value::as_f64).unwrap_or(0.0) as f32;
            let source = hit.get("_source").cloned().unwrap_or_else(|| json!({}));
            let record = record_from_source(id, &source)?;
            results.push(ScoredRecord {
                id: id.to_string(),
                score,
                fields: record.project(&query.projection),
            });
        }
        results.truncate(query.k);
        Ok(results)
    }

    async fn count(&self, filter: &RecordFilter) -> Result<u64> {
        let body = json!({ "query": filter_query(filter) });
        let response = self
            .send_json(self.client.post(self.url("_count")).json(&body))
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::malformed(SERVICE, "count response without count"))
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::slice::SliceSpec;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn engine(server: &MockServer) -> HttpStorageEngine {
        HttpStorageEngine::new(server.uri(), "logs", Duration::from_secs(2)).unwrap()
    }

    #[test]
    fn test_vector_mapping_merges_index_options() {
        let mut schema = VectorFieldSchema::new("vector", 8);
        schema.index_options = json!({ "parameters": { "m": 16 } });
        let mapping = vector_mapping(&schema);
        assert_eq!(mapping["properties"]["vector"]["dimension"], 8);
        assert_eq!(mapping["properties"]["vector"]["method"]["parameters"]["m"], 16);
        assert_eq!(
            mapping["properties"]["vector_pipeline_version"]["type"],
            "long"
        );
    }

    #[test]
    fn test_filter_query_translation() {
        assert_eq!(filter_query(&RecordFilter::All), json!({ "match_all": {} }));
        assert_eq!(
            filter_query(&RecordFilter::term("level", "INFO")),
            json!({ "term": { "level.keyword": "INFO" } })
        );
        let stale = filter_query(&RecordFilter::stale("vector", 2));
        assert_eq!(
            stale["bool"]["must_not"][0]["term"]["vector_pipeline_version"],
            2
        );
        let and = filter_query(&RecordFilter::And {
            filters: vec![RecordFilter::All, RecordFilter::All],
        });
        assert_eq!(and["bool"]["filter"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_document_round_trip() {
        let record = Record::new("r1")
            .with_attribute("message", "hello")
            .with_vector("vector", StoredVector::new(vec![0.5, 0.0], 3));
        let doc = document(&record);
        assert_eq!(doc[ID_FIELD], "r1");
        assert_eq!(doc[PARTITION_FIELD], partition_key("r1"));

        let back = record_from_source("r1", &doc).unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn test_read_batch_uses_slice_and_cursor() {
        let server = MockServer::start().await;
        let slice = SliceSpec::new(1, 2).unwrap();
        let cursor = Cursor::after("r0");

        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .and(body_partial_json(json!({
                "size": 2,
                "search_after": [cursor.partition, "r0"],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "hits": [
                    { "_id": "r5", "_source": { "message": "five", "record_id": "r5" } },
                    { "_id": "r9", "_source": { "message": "nine", "record_id": "r9" } }
                ] }
            })))
            .mount(&server)
            .await;

        let request = ReadRequest::new(RecordFilter::All, 2)
            .with_slice(slice)
            .with_cursor(Some(cursor.encode()));
        let page = engine(&server).await.read_batch(&request).await.unwrap();

        assert_eq!(page.records.len(), 2);
        assert!(page.has_more);
        assert_eq!(page.records[0].attribute("message"), Some("five"));
        assert_eq!(
            Cursor::decode(page.next_cursor.as_deref().unwrap()).unwrap().id,
            "r9"
        );
    }

    #[tokio::test]
    async fn test_update_vectors_reports_item_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/_bulk"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": true,
                "items": [
                    { "update": { "_id": "a", "status": 200 } },
                    { "update": {
                        "_id": "b",
                        "status": 404,
                        "error": { "type": "document_missing_exception", "reason": "missing" }
                    } }
                ]
            })))
            .mount(&server)
            .await;

        let updates: Vec<VectorUpdate> = ["a", "b"]
            .iter()
            .map(|id| VectorUpdate {
                id: id.to_string(),
                field: "vector".into(),
                vector: StoredVector::new(vec![0.1], 1),
            })
            .collect();
        let outcomes = engine(&server)
            .await
            .update_vectors(&updates)
            .await
            .unwrap();
        assert!(outcomes[0].is_ok());
        assert_eq!(outcomes[1].error.as_deref(), Some("missing"));
    }

    #[tokio::test]
    async fn test_nearest_parses_hits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/logs/_search"))
            .and(body_partial_json(json!({
                "size": 1,
                "query": { "knn": { "vector": { "k": 5 } } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hits": { "hits": [
                    { "_id": "a", "_score": 0.93, "_source": { "message": "hi", "record_id": "a" } }
                ] }
            })))
            .mount(&server)
            .await;

        let hits = engine(&server)
            .await
            .nearest(&NearestQuery {
                field: "vector".into(),
                vector: vec![0.1, 0.2],
                k: 1,
                candidates: 5,
                projection: vec!["message".into()],
            })
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!((hits[0].score - 0.93).abs() < 1e-6);
        assert_eq!(hits[0].fields.get("message").map(String::as_str), Some("hi"));
    }

    #[tokio::test]
    async fn test_get_missing_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logs/_doc/nope"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({ "_id": "nope", "found": false })),
            )
            .mount(&server)
            .await;

        assert!(engine(&server).await.get_record("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_record_ids_are_escaped_in_paths() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/logs/_doc/a%2Fb%3Fc%23d"))
            .and(body_partial_json(json!({ "record_id": "a/b?c#d" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "result": "created" })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/logs/_doc/a%2Fb%3Fc%23d"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({ "found": false })))
            .expect(1)
            .mount(&server)
            .await;

        let engine = engine(&server).await;
        engine
            .put_record(&Record::new("a/b?c#d").with_attribute("message", "hi"))
            .await
            .unwrap();
        assert!(engine.get_record("a/b?c#d").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_declare_creates_missing_index() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/logs"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/logs"))
            .and(body_partial_json(json!({ "settings": { "index": { "knn": true } } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
            .expect(1)
            .mount(&server)
            .await;

        engine(&server)
            .await
            .declare_vector_field(&VectorFieldSchema::new("vector", 4))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = engine(&server)
            .await
            .count(&RecordFilter::All)
            .await
            .unwrap_err();
        assert!(err.is_unreachable());
    }
}
