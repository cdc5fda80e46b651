use crate::compare::interface::{CompareError, HeatmapPublisher};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use uuid::Uuid;
use warp::Filter;

/// Writes heat-maps to a directory. Until [`start`](Self::start) is called the
/// published reference is the file's `file://` URL, which stays valid after
/// the process exits. Once started, heat-maps are served at
/// `http://127.0.0.1:{port}/heatmaps/{filename}` for as long as this process runs.
pub struct LocalHeatmapServer {
    /// 0 while not serving.
    pub port: u16,
    pub output_dir: PathBuf,
    counter: AtomicU32,
}

impl LocalHeatmapServer {
    /// Create the output directory (absolute, so file URLs resolve). Existing heat-maps are kept.
    pub fn new(output_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(output_dir)?;
        Ok(Self {
            port: 0,
            output_dir: std::fs::canonicalize(output_dir)?,
            counter: AtomicU32::new(1),
        })
    }

    /// Start the HTTP file server in background on `port` (0 picks a free one).
    pub async fn start(&mut self, port: u16) -> Result<(), CompareError> {
        let dir = self.output_dir.clone();

        let route = warp::path("heatmaps")
            .and(warp::path::param::<String>())
            .and(warp::get())
            .and(warp::any().map(move || dir.clone()))
            .and_then(serve_file);

        let (addr, fut) = warp::serve(route)
            .try_bind_ephemeral(([127, 0, 0, 1], port))
            .map_err(|e| {
                CompareError::Publish(format!("cannot bind heat-map server on port {}: {}", port, e))
            })?;
        self.port = addr.port();
        tracing::info!(port = self.port, "heat-map server started");

        tokio::spawn(fut);
        Ok(())
    }

    pub fn is_serving(&self) -> bool {
        self.port != 0
    }

    pub fn http_url(&self, filename: &str) -> String {
        format!("http://127.0.0.1:{}/heatmaps/{}", self.port, filename)
    }

    fn file_url(&self, filename: &str) -> Result<String, CompareError> {
        let path = self.output_dir.join(filename);
        reqwest::Url::from_file_path(&path)
            .map(|url| url.to_string())
            .map_err(|_| CompareError::Publish(format!("no file URL for {}", path.display())))
    }

    fn save(&self, image_name: &str, png: &[u8]) -> Result<String, CompareError> {
        if !png.starts_with(b"\x89PNG") {
            return Err(CompareError::Publish("heat-map is not a PNG".to_string()));
        }

        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let short_id = &Uuid::new_v4().simple().to_string()[..8];
        let filename = format!("{}_{}_{}.png", sanitize(image_name), seq, short_id);

        let path = self.output_dir.join(&filename);
        if !path.starts_with(&self.output_dir) {
            return Err(CompareError::Publish("invalid heat-map filename".to_string()));
        }
        std::fs::write(&path, png)
            .map_err(|e| CompareError::Publish(format!("failed to write {}: {}", path.display(), e)))?;
        Ok(filename)
    }
}

#[async_trait]
impl HeatmapPublisher for LocalHeatmapServer {
    fn id(&self) -> String {
        "local".to_string()
    }

    async fn publish(&self, image_name: &str, png: &[u8]) -> Result<String, CompareError> {
        let filename = self.save(image_name, png)?;
        let url = if self.is_serving() {
            self.http_url(&filename)
        } else {
            self.file_url(&filename)?
        };
        tracing::debug!(image_name, %url, "heat-map published");
        Ok(url)
    }
}

/// Keep screen names readable in filenames without allowing path components.
fn sanitize(image_name: &str) -> String {
    let cleaned: String = image_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(64)
        .collect();
    if cleaned.is_empty() {
        "heatmap".to_string()
    } else {
        cleaned
    }
}

async fn serve_file(filename: String, dir: PathBuf) -> Result<impl warp::Reply, warp::Rejection> {
    if filename.contains("..") || filename.contains('/') || filename.contains('\\') {
        return Err(warp::reject::not_found());
    }

    let path = dir.join(&filename);
    if !path.starts_with(&dir) || path.extension().and_then(|e| e.to_str()) != Some("png") {
        return Err(warp::reject::not_found());
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| warp::reject::not_found())?;

    let reply = warp::reply::with_header(bytes, "Content-Type", "image/png");
    let reply = warp::reply::with_header(reply, "Cache-Control", "no-store");
    Ok(warp::reply::with_header(reply, "Access-Control-Allow-Origin", "*"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::decode::test_support::solid_bytes;
    use crate::imaging::SourceFormat;

    fn png() -> Vec<u8> {
        solid_bytes(8, 8, [255, 0, 0, 255], SourceFormat::Png)
    }

    async fn wait_for(client: &reqwest::Client, url: &str) -> reqwest::Response {
        for _ in 0..20 {
            if let Ok(resp) = client.get(url).send().await {
                return resp;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        panic!("server never answered {}", url);
    }

    #[tokio::test]
    async fn published_heatmap_is_served() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = LocalHeatmapServer::new(tmp.path()).unwrap();
        server.start(0).await.unwrap();

        let bytes = png();
        let url = server.publish("home/page", &bytes).await.unwrap();
        assert!(url.contains("/heatmaps/home_page_1_"));

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let resp = wait_for(&client, &url).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers()["content-type"], "image/png");
        assert_eq!(resp.bytes().await.unwrap().to_vec(), bytes);
    }

    #[tokio::test]
    async fn traversal_and_missing_files_are_404() {
        let tmp = tempfile::tempdir().unwrap();
        let mut server = LocalHeatmapServer::new(tmp.path()).unwrap();
        server.start(0).await.unwrap();

        let client = reqwest::Client::builder().no_proxy().build().unwrap();
        let resp = wait_for(&client, &server.http_url("nope.png")).await;
        assert_eq!(resp.status(), 404);
        let resp = wait_for(&client, &server.http_url("..%2Fsecret.png")).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn unserved_heatmap_is_a_file_url_that_outlives_the_publisher() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = png();
        let url = {
            let server = LocalHeatmapServer::new(tmp.path()).unwrap();
            server.publish("home", &bytes).await.unwrap()
        };
        assert!(url.starts_with("file://"), "got {}", url);

        let path = reqwest::Url::parse(&url).unwrap().to_file_path().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), bytes);
    }

    #[tokio::test]
    async fn configured_port_is_used_and_taken_port_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = free.local_addr().unwrap().port();

        let mut busy = LocalHeatmapServer::new(tmp.path()).unwrap();
        assert!(matches!(busy.start(port).await, Err(CompareError::Publish(_))));
        drop(free);

        let mut server = LocalHeatmapServer::new(tmp.path()).unwrap();
        server.start(port).await.unwrap();
        assert_eq!(server.port, port);
        let url = server.publish("home", &png()).await.unwrap();
        assert!(url.starts_with(&format!("http://127.0.0.1:{}/heatmaps/home_", port)));
    }

    #[test]
    fn non_png_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let server = LocalHeatmapServer::new(tmp.path()).unwrap();
        assert!(matches!(server.save("home", b"\xFF\xD8\xFFjpeg"), Err(CompareError::Publish(_))));
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize("../etc/passwd"), "___etc_passwd");
        assert_eq!(sanitize(""), "heatmap");
        assert_eq!(sanitize("Login-Screen_2"), "Login-Screen_2");
    }
}
