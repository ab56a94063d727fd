use super::{DocumentStore, ViewQuery};
use crate::config::StoreConfig;
use crate::core::{Document, Result, Revision, StoreError};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;

/// [`DocumentStore`] over the CouchDB HTTP API.
pub struct CouchDocumentStore {
    http: Client,
    db_url: Url,
    credentials: Option<(String, String)>,
}

#[derive(Deserialize)]
struct SaveResponse {
    id: String,
    rev: Revision,
}

#[derive(Deserialize)]
struct RowsResponse {
    rows: Vec<RowEntry>,
}

#[derive(Deserialize)]
struct RowEntry {
    #[serde(default)]
    doc: Option<Document>,
}

#[derive(Deserialize)]
struct DatabaseInfo {
    #[serde(default)]
    update_seq: Option<Value>,
}

impl CouchDocumentStore {
    /// Connects to the configured server, creating the database if missing.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let mut server = Url::parse(&config.url)
            .map_err(|e| StoreError::Config(format!("invalid CouchDB url '{}': {}", config.url, e)))?;

        let credentials = if server.username().is_empty() {
            None
        } else {
            Some((
                server.username().to_string(),
                server.password().unwrap_or_default().to_string(),
            ))
        };
        let _ = server.set_username("");
        let _ = server.set_password(None);

        let mut db_url = server;
        db_url
            .path_segments_mut()
            .map_err(|_| StoreError::Config(format!("url '{}' cannot be a base", config.url)))?
            .pop_if_empty()
            .push(&config.database)
            .push("");

        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let store = Self {
            http,
            db_url,
            credentials,
        };
        store.ensure_database().await?;
        Ok(store)
    }

    async fn ensure_database(&self) -> Result<()> {
        let response = self.request(Method::PUT, self.db_url.clone()).send().await?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::PRECONDITION_FAILED => Ok(()),
            status => Err(StoreError::Transport(format!(
                "creating database {} failed with {}",
                self.db_url, status
            ))),
        }
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// URL of a document, keeping `_design/<name>` as two path segments.
    fn doc_url(&self, doc_id: &str) -> Result<Url> {
        let mut url = self.db_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Config("database url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            match doc_id.strip_prefix("_design/") {
                Some(name) => {
                    segments.push("_design").push(name);
                }
                None => {
                    segments.push(doc_id);
                }
            }
        }
        Ok(url)
    }

    fn path_url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.db_url.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Config("database url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn check(response: Response, doc_id: &str) -> Result<Response> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(doc_id.to_string())),
            StatusCode::CONFLICT => Err(StoreError::Conflict(doc_id.to_string())),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Transport(format!(
                    "request for '{}' failed with {}: {}",
                    doc_id, status, body
                )))
            }
        }
    }

    async fn fetch_rows(&self, url: Url, params: Vec<(&str, String)>, label: &str) -> Result<Vec<Document>> {
        let response = self.request(Method::GET, url).query(&params).send().await?;
        let rows: RowsResponse = Self::check(response, label).await?.json().await?;
        Ok(rows.rows.into_iter().filter_map(|row| row.doc).collect())
    }
}

#[async_trait]
impl DocumentStore for CouchDocumentStore {
    async fn get(&self, doc_id: &str) -> Result<Option<Document>> {
        let response = self.request(Method::GET, self.doc_url(doc_id)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let doc = Self::check(response, doc_id).await?.json().await?;
        Ok(Some(doc))
    }

    async fn save(&self, doc: Document) -> Result<(String, Revision)> {
        debug!("couch PUT '{}' rev={:?}", doc.id, doc.rev);
        let response = self
            .request(Method::PUT, self.doc_url(&doc.id)?)
            .json(&doc)
            .send()
            .await?;
        let saved: SaveResponse = Self::check(response, &doc.id).await?.json().await?;
        Ok((saved.id, saved.rev))
    }

    async fn delete(&self, doc_id: &str, rev: &Revision) -> Result<()> {
        let response = self
            .request(Method::DELETE, self.doc_url(doc_id)?)
            .query(&[("rev", rev.as_str())])
            .send()
            .await?;
        Self::check(response, doc_id).await?;
        Ok(())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<Document>> {
        let params = vec![
            ("include_docs", "true".to_string()),
            ("startkey", serde_json::to_string(prefix)?),
            ("endkey", serde_json::to_string(&format!("{}\u{fff0}", prefix))?),
        ];
        self.fetch_rows(self.path_url(&["_all_docs"])?, params, "_all_docs")
            .await
    }

    async fn count_prefix(&self, prefix: &str) -> Result<usize> {
        let params = [
            ("include_docs", "false".to_string()),
            ("startkey", serde_json::to_string(prefix)?),
            ("endkey", serde_json::to_string(&format!("{}\u{fff0}", prefix))?),
        ];
        let response = self
            .request(Method::GET, self.path_url(&["_all_docs"])?)
            .query(&params)
            .send()
            .await?;
        let rows: RowsResponse = Self::check(response, "_all_docs").await?.json().await?;
        Ok(rows.rows.len())
    }

    async fn query_view(&self, query: &ViewQuery) -> Result<Vec<Document>> {
        let mut params = vec![
            ("include_docs", "true".to_string()),
            ("descending", query.descending.to_string()),
            ("skip", query.skip.to_string()),
        ];
        if let Some(start) = &query.start_key {
            params.push(("startkey", serde_json::to_string(start)?));
        }
        if let Some(end) = &query.end_key {
            params.push(("endkey", serde_json::to_string(end)?));
        }
        if let Some(limit) = query.limit {
            params.push(("limit", limit.to_string()));
        }
        let url = self.path_url(&["_design", &query.design, "_view", &query.view])?;
        let label = format!("_design/{}/_view/{}", query.design, query.view);
        self.fetch_rows(url, params, &label).await
    }

    async fn update_seq(&self) -> Result<Option<String>> {
        let response = self.request(Method::GET, self.db_url.clone()).send().await?;
        let info: DatabaseInfo = Self::check(response, "database info").await?.json().await?;
        Ok(info.update_seq.map(|seq| match seq {
            Value::String(text) => text,
            other => other.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    fn store_at(base: &str) -> CouchDocumentStore {
        CouchDocumentStore {
            http: Client::builder().no_proxy().build().unwrap(),
            db_url: Url::parse(&format!("{}/trains/", base)).unwrap(),
            credentials: None,
        }
    }

    /// Reads one request (head plus `content-length` body) and returns the head.
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return String::from_utf8_lossy(&buf).to_string();
            }
            buf.extend_from_slice(&chunk[..n]);
            let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            while buf.len() < end + 4 + length {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return head;
        }
    }

    /// Answers one connection per canned `(status, body)` and reports each
    /// request line it saw.
    async fn serve(responses: Vec<(u16, &'static str)>) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let head = read_request(&mut socket).await;
                let _ = tx.send(head.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (base, rx)
    }

    #[test]
    fn test_doc_url_keeps_design_prefix_as_segments() {
        let store = store_at("http://localhost:5984");
        assert_eq!(
            store.doc_url("car:1").unwrap().as_str(),
            "http://localhost:5984/trains/car:1"
        );
        assert_eq!(store.doc_url("_design/indexes").unwrap().path(), "/trains/_design/indexes");
        assert_eq!(store.doc_url("odd/id").unwrap().path(), "/trains/odd%2Fid");
        assert_eq!(
            store.path_url(&["_design", "indexes", "_view", "by_type_id"]).unwrap().path(),
            "/trains/_design/indexes/_view/by_type_id"
        );
    }

    #[tokio::test]
    async fn test_status_codes_map_to_store_errors() {
        let (base, mut requests) = serve(vec![
            (412, r#"{"error":"file_exists"}"#),
            (404, r#"{"error":"not_found"}"#),
            (409, r#"{"error":"conflict"}"#),
            (404, r#"{"error":"not_found"}"#),
            (500, r#"{"error":"boom"}"#),
            (201, r#"{"ok":true,"id":"_design/indexes","rev":"1-abc"}"#),
        ])
        .await;
        let store = store_at(&base);

        store.ensure_database().await.unwrap();
        assert!(store.get("car:9").await.unwrap().is_none());
        assert!(store.save(Document::new("car:1")).await.unwrap_err().is_conflict());
        assert!(
            store
                .delete("car:2", &Revision::new("1-abc"))
                .await
                .unwrap_err()
                .is_not_found()
        );
        let err = store.get("car:3").await.unwrap_err();
        assert!(matches!(err, StoreError::Transport(ref message) if message.contains("boom")));

        let (id, rev) = store.save(Document::new("_design/indexes")).await.unwrap();
        assert_eq!(id, "_design/indexes");
        assert_eq!(rev.generation(), Some(1));

        let mut lines = Vec::new();
        while let Some(line) = requests.recv().await {
            lines.push(line);
        }
        assert_eq!(
            lines,
            vec![
                "PUT /trains/ HTTP/1.1",
                "GET /trains/car:9 HTTP/1.1",
                "PUT /trains/car:1 HTTP/1.1",
                "DELETE /trains/car:2?rev=1-abc HTTP/1.1",
                "GET /trains/car:3 HTTP/1.1",
                "PUT /trains/_design/indexes HTTP/1.1",
            ]
        );
    }
}
