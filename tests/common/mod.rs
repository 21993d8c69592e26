#![allow(dead_code)]
use std::sync::{Arc, Mutex};

use axum::{http::StatusCode, routing::post, Json, Router};
use serde_json::Value;

/// nmap -oX style document with one host: 22/open ssh, 80/closed http.
pub const ONE_HOST_SSH_OPEN_HTTP_CLOSED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE nmaprun>
<?xml-stylesheet href="file:///usr/share/nmap/nmap.xsl" type="text/xsl"?>
<nmaprun scanner="nmap" args="nmap -sV -sC -v --top-ports 100 -oX - 192.0.2.10" start="1700000000" version="7.94" xmloutputversion="1.05">
<scaninfo type="syn" protocol="tcp" numservices="100" services="7,9,13"/>
<verbose level="1"/>
<host starttime="1700000001" endtime="1700000020"><status state="up" reason="echo-reply" reason_ttl="63"/>
<address addr="192.0.2.10" addrtype="ipv4"/>
<hostnames>
<hostname name="web.example.test" type="PTR"/>
</hostnames>
<ports><extraports state="closed" count="98"/>
<port protocol="tcp" portid="80"><state state="closed" reason="reset" reason_ttl="63"/><service name="http" method="table" conf="3"/></port>
<port protocol="tcp" portid="22"><state state="open" reason="syn-ack" reason_ttl="63"/><service name="ssh" product="OpenSSH" version="8.9p1 Ubuntu 3ubuntu0.6" extrainfo="Ubuntu Linux; protocol 2.0" ostype="Linux" method="probed" conf="10"/></port>
</ports>
</host>
<runstats><finished time="1700000020" timestr="Tue Nov 14 22:13:40 2023" elapsed="20.1" summary="Nmap done" exit="success"/><hosts up="1" down="0" total="1"/></runstats>
</nmaprun>"#;

/// One host whose ports are all closed or filtered.
pub const ONE_HOST_NOTHING_OPEN: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
<host><status state="up"/>
<address addr="192.0.2.20" addrtype="ipv4"/>
<hostnames/>
<ports>
<port protocol="tcp" portid="443"><state state="filtered" reason="no-response"/></port>
<port protocol="tcp" portid="80"><state state="closed" reason="reset"/></port>
</ports>
</host>
</nmaprun>"#;

/// Requests seen by a stub model server.
pub type Seen = Arc<Mutex<Vec<Value>>>;

/// Serve `POST /api/chat` on an ephemeral port, always answering `status`
/// with `body`. Returns the base URL and the recorded request bodies.
pub async fn spawn_chat_stub(status: StatusCode, body: Value) -> (String, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let app = Router::new().route(
        "/api/chat",
        post(move |Json(req): Json<Value>| {
            let body = body.clone();
            let record = record.clone();
            async move {
                record.lock().unwrap().push(req);
                (status, Json(body))
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), seen)
}
