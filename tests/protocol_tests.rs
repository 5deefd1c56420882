use std::net::SocketAddr;
use std::time::Duration;

use futures::future::join_all;
use tempfile::TempDir;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use nfstore::client::Client;
use nfstore::config::ServerConfig;
use nfstore::correlation::CorrelationId;
use nfstore::server::Server;
use nfstore::storage::WriteLockPolicy;

// In-process server on an ephemeral localhost port. Dropping `shutdown` (or
// sending on it) stops the accept loop.
struct TestServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
    tmp: TempDir,
}

async fn start_server(policy: WriteLockPolicy) -> TestServer {
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = ServerConfig::with_root(tmp.path());
    cfg.port = 0;
    cfg.write_lock = policy;
    cfg.shutdown_grace_ms = 2_000;
    let server = Server::bind(cfg).await.expect("bind ephemeral port");
    let addr = server.local_addr().unwrap();
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.serve(async move {
        let _ = rx.await;
    }));
    TestServer { addr, shutdown: Some(tx), handle, tmp }
}

impl TestServer {
    async fn client(&self) -> Client {
        Client::connect(self.addr, None).await.unwrap()
    }

    async fn stop(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn traced_session_over_tcp() {
    let srv = start_server(WriteLockPolicy::Global).await;
    let id = CorrelationId::new();
    let mut c = Client::connect(srv.addr, Some(&id)).await.unwrap();
    assert!(c.open("photo").await.unwrap());
    assert_eq!(c.write(0, b"NETA").await.unwrap(), Some(4));
    assert_eq!(c.read(0, 4).await.unwrap().unwrap(), b"NETA");
    assert_eq!(c.read(2, 100).await.unwrap().unwrap(), b"TA");
    assert_eq!(c.read(10, 4).await.unwrap().unwrap(), Vec::<u8>::new());
    assert_eq!(c.stat("photo").await.unwrap(), Some(4));
    assert_eq!(c.stat("missing_file").await.unwrap(), None);
    assert_eq!(c.list().await.unwrap().unwrap(), vec!["photo".to_string()]);
    assert!(srv.tmp.path().join("photo").is_file());
    drop(c);
    srv.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_on_distinct_files() {
    let srv = start_server(WriteLockPolicy::Global).await;
    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let mut c = srv.client().await;
        tasks.push(tokio::spawn(async move {
            let name = format!("file-{}", i);
            assert!(c.open(&name).await.unwrap());
            let body = vec![i; 1024];
            assert_eq!(c.write(0, &body).await.unwrap(), Some(1024));
            for _ in 0..50 {
                assert_eq!(c.read(0, 1024).await.unwrap().unwrap(), body);
                assert_eq!(c.read(512, 16).await.unwrap().unwrap(), vec![i; 16]);
            }
        }));
    }
    for joined in join_all(tasks).await {
        joined.unwrap();
    }
    let mut c = srv.client().await;
    assert_eq!(c.list().await.unwrap().unwrap().len(), 8);
    drop(c);
    srv.stop().await;
}

async fn interleaved_writers(policy: WriteLockPolicy) {
    let srv = start_server(policy).await;
    const CHUNK: usize = 256;
    const WRITERS: usize = 4;
    const ROUNDS: usize = 32;
    let mut tasks = Vec::new();
    for w in 0..WRITERS {
        let mut c = srv.client().await;
        tasks.push(tokio::spawn(async move {
            assert!(c.open("shared").await.unwrap());
            for r in 0..ROUNDS {
                let slot = r * WRITERS + w;
                let data = vec![(slot % 251) as u8; CHUNK];
                assert_eq!(c.write((slot * CHUNK) as u64, &data).await.unwrap(), Some(CHUNK as u64));
            }
        }));
    }
    for joined in join_all(tasks).await {
        joined.unwrap();
    }
    let mut c = srv.client().await;
    c.open("shared").await.unwrap();
    let total = WRITERS * ROUNDS * CHUNK;
    let all = c.read(0, total as u64).await.unwrap().unwrap();
    assert_eq!(all.len(), total);
    for (slot, chunk) in all.chunks(CHUNK).enumerate() {
        assert!(chunk.iter().all(|&b| b == (slot % 251) as u8), "slot {} corrupted", slot);
    }
    drop(c);
    srv.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_global_lock() {
    interleaved_writers(WriteLockPolicy::Global).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writes_per_file_lock() {
    interleaved_writers(WriteLockPolicy::PerFile).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn write_in_one_session_is_visible_to_cached_reader() {
    let srv = start_server(WriteLockPolicy::Global).await;
    let mut reader = srv.client().await;
    let mut writer = srv.client().await;
    reader.open("doc").await.unwrap();
    writer.open("doc").await.unwrap();
    writer.write(0, b"first").await.unwrap();
    assert_eq!(reader.read(0, 5).await.unwrap().unwrap(), b"first");
    assert_eq!(reader.read(0, 5).await.unwrap().unwrap(), b"first");
    writer.write(0, b"FIRST").await.unwrap();
    assert_eq!(reader.read(0, 5).await.unwrap().unwrap(), b"FIRST");
    drop((reader, writer));
    srv.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn trash_and_restore_across_sessions() {
    let srv = start_server(WriteLockPolicy::Global).await;
    let mut a = srv.client().await;
    let mut b = srv.client().await;
    a.open("report.txt").await.unwrap();
    a.write(0, b"draft").await.unwrap();
    assert!(b.delete("report.txt").await.unwrap());
    assert_eq!(b.stat("report.txt").await.unwrap(), None);
    assert_eq!(a.list_trash().await.unwrap().unwrap(), vec!["report.txt".to_string()]);

    // same name trashed again gets a suffixed slot
    b.open("report.txt").await.unwrap();
    b.write(0, b"v2").await.unwrap();
    assert!(b.trash("report.txt").await.unwrap());
    assert_eq!(
        a.list_trash().await.unwrap().unwrap(),
        vec!["report (1).txt".to_string(), "report.txt".to_string()]
    );

    assert!(a.restore("report.txt").await.unwrap());
    assert!(a.restore("report (1).txt").await.unwrap());
    assert_eq!(a.stat("report.txt").await.unwrap(), Some(5));
    assert_eq!(a.stat("report (1).txt").await.unwrap(), Some(2));
    assert!(a.list_trash().await.unwrap().unwrap().is_empty());
    assert!(!a.purge_trash("report.txt").await.unwrap());
    drop((a, b));
    srv.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bad_requests_do_not_affect_other_sessions() {
    let srv = start_server(WriteLockPolicy::Global).await;
    let mut bad = srv.client().await;
    let mut good = srv.client().await;
    bad.send_raw(b"READ x y\nWRITE -1 5\nNOPE\n").await.unwrap();
    for _ in 0..3 {
        assert_eq!(bad.read_header().await.unwrap(), nfstore::protocol::ReplyHeader::Err);
    }
    assert!(good.open("fine").await.unwrap());
    assert!(bad.open("also-fine").await.unwrap());
    drop((bad, good));
    srv.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_closes_idle_sessions() {
    let srv = start_server(WriteLockPolicy::Global).await;
    let mut idle = srv.client().await;
    idle.open("f").await.unwrap();
    let addr = srv.addr;
    srv.stop().await;
    // the session was told to stop, so the connection is gone
    assert!(idle.list().await.is_err());
    assert!(Client::connect(addr, None).await.is_err());
}
