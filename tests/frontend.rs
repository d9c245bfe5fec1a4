use std::{net::SocketAddr, sync::Arc, time::Duration};

use replikv::{
    error::NetError,
    net::{self, reply, Client, KvService, Request},
    paxos, twopc, Config, LOOPBACK,
};

fn serve(service: Arc<dyn KvService>) -> (net::Frontend, Client) {
    let front = net::listen(service, SocketAddr::from((LOOPBACK, 0))).unwrap();
    let client = Client::connect(front.addr(), Duration::from_secs(5)).unwrap();
    (front, client)
}

fn exercise(client: &Client) {
    let get = |k: &str| Request::Get { key: k.into() };
    assert_eq!(client.call(get("a")).unwrap(), reply::get("a", None));
    assert_eq!(
        client
            .call(Request::Put {
                key: "a".into(),
                value: "1".into()
            })
            .unwrap(),
        reply::put("a", true)
    );
    assert_eq!(client.call(get("a")).unwrap(), "1");
    assert_eq!(
        client.call(Request::Delete { key: "a".into() }).unwrap(),
        reply::delete("a", true)
    );
    assert_eq!(
        client.call(Request::Delete { key: "a".into() }).unwrap(),
        reply::absent("a")
    );
}

#[test]
fn paxos_replica_over_tcp() {
    let cluster = paxos::dir::cluster_init(&Config {
        base_port: 19000,
        ..Config::default()
    })
    .unwrap();
    let (_front, client) = serve(cluster.replicas[1].clone());
    exercise(&client);
    assert!(cluster.replicas[3].lookup("a").is_none());
}

#[test]
fn twopc_replica_over_tcp() {
    let cluster = twopc::dir::cluster_init(&Config {
        base_port: 19100,
        ..Config::default()
    })
    .unwrap();
    let (_front, client) = serve(cluster.replicas[2].clone());
    exercise(&client);

    client
        .call("PUT b 2".parse().unwrap())
        .unwrap();
    assert!(cluster
        .replicas
        .iter()
        .all(|r| r.lookup("b").as_deref() == Some("2")));
    cluster.coordinator.shutdown();
}

#[test]
fn stopped_frontend_drops_clients() {
    let cluster = paxos::dir::cluster_init(&Config {
        base_port: 19200,
        ..Config::default()
    })
    .unwrap();
    let (front, client) = serve(cluster.replicas[0].clone());
    assert!(client.call(Request::Get { key: "a".into() }).is_ok());

    front.stop();
    assert!(matches!(
        client.call(Request::Get { key: "a".into() }),
        Err(NetError::Disconnected | NetError::TimedOut)
    ));
}

#[test]
fn taken_port_falls_back_to_another() {
    let cluster = paxos::dir::cluster_init(&Config {
        base_port: 19300,
        ..Config::default()
    })
    .unwrap();
    let (taken, _client) = serve(cluster.replicas[0].clone());

    let moved = net::listen_with_retry(cluster.replicas[1].clone(), taken.addr().port()).unwrap();
    assert_ne!(moved.addr().port(), taken.addr().port());
    assert!(net::FALLBACK_PORTS.contains(&moved.addr().port()));

    let client = Client::connect(moved.addr(), Duration::from_secs(5)).unwrap();
    assert_eq!(
        client.call(Request::Get { key: "a".into() }).unwrap(),
        reply::get("a", None)
    );
}
