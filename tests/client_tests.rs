use std::time::Duration;

use melview::{Error, MelView, Mode};
use serde_json::{json, Value};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn login_response() -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("set-cookie", "auth=testcookie; path=/; HttpOnly")
        .set_body_json(json!({ "userunits": 1 }))
}

fn rooms_body() -> Value {
    json!([
        { "buildingid": 1, "units": [{ "unitid": 42, "room": "Living Room" }] }
    ])
}

fn caps_body() -> Value {
    json!({
        "fanstage": 3,
        "hasautofan": 1,
        "modelname": "MSZ-AP50VGD",
        "halfdeg": 1,
        "hasairdir": 1,
        "hasairdirh": 0,
        "hasswing": 1,
        "hasairauto": 1,
        "max": {
            "1": { "min": 16, "max": 31 },
            "3": { "min": 16, "max": 31 },
            "8": { "min": 16, "max": 31 }
        },
        "error": "ok",
        "fault": ""
    })
}

fn state_body() -> Value {
    json!({
        "power": 1,
        "standby": 0,
        "setmode": 1,
        "settemp": "22.0",
        "roomtemp": "21.5",
        "setfan": 3,
        "airdir": 0,
        "airdirh": 0,
        "zones": [{ "zoneid": 1, "name": "Living", "status": 1 }],
        "fault": "",
        "error": "ok"
    })
}

async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/login.aspx"))
        .respond_with(login_response())
        .mount(server)
        .await;
}

async fn mount_rooms(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/rooms.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_caps(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/unitcapabilities.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Matches only state fetches; command posts carry a `commands` field
/// and are matched by higher-priority mocks.
async fn mount_state(server: &MockServer, body: Value) {
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn builder_for(server: &MockServer) -> melview::MelViewBuilder {
    MelView::builder("user@example.com", "hunter2").base_url(server.uri())
}

async fn logged_in(server: &MockServer) -> MelView {
    mount_login(server).await;
    let client = builder_for(server).build();
    client.login().await.expect("login should succeed");
    client
}

async fn standard_mocks(server: &MockServer) {
    mount_rooms(server, rooms_body()).await;
    mount_caps(server, caps_body()).await;
    mount_state(server, state_body()).await;
}

#[tokio::test]
async fn list_devices_flattens_buildings_into_units() {
    let server = MockServer::start().await;
    mount_rooms(
        &server,
        json!([
            {
                "buildingid": 1,
                "units": [
                    { "unitid": 10, "room": "Living Room" },
                    { "unitid": 11, "room": "Bedroom" }
                ]
            },
            { "buildingid": 2, "units": [{ "unitid": 20, "room": "Office" }] }
        ]),
    )
    .await;
    mount_caps(&server, caps_body()).await;
    mount_state(&server, state_body()).await;

    let client = logged_in(&server).await;
    let devices = client.list_devices().await.expect("listing should succeed");

    assert_eq!(devices.len(), 3);
    assert_eq!(devices[0].id(), 10);
    assert_eq!(devices[0].building_id(), 1);
    assert_eq!(devices[0].friendly_name(), "Living Room");
    assert_eq!(devices[2].id(), 20);
    assert_eq!(devices[2].building_id(), 2);
}

#[tokio::test]
async fn empty_account_is_a_configuration_error() {
    let server = MockServer::start().await;
    mount_rooms(&server, json!([])).await;

    let client = logged_in(&server).await;
    let err = client.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::NoDevices), "expected NoDevices, got {err:?}");
}

#[tokio::test]
async fn negative_unit_id_is_a_decode_error() {
    let server = MockServer::start().await;
    mount_rooms(
        &server,
        json!([{ "buildingid": 1, "units": [{ "unitid": -7, "room": "Attic" }] }]),
    )
    .await;

    let client = logged_in(&server).await;
    let err = client.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "expected Decode, got {err:?}");
}

#[tokio::test]
async fn reads_within_lease_fetch_state_once() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    // Initial refresh is the only state fetch allowed.
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(state_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let device = &mut devices[0];

    assert!(device.is_power_on().await.unwrap());
    assert_eq!(device.mode().await.unwrap(), Mode::Heat);
    assert!((device.room_temperature().await.unwrap() - 21.5).abs() < 0.01);
    assert!((device.target_temperature().await.unwrap() - 22.0).abs() < 0.01);
}

#[tokio::test]
async fn expired_lease_triggers_refresh_on_read() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    // One fetch at discovery, one for the lease-expired read.
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(state_body()))
        .expect(2)
        .mount(&server)
        .await;

    mount_login(&server).await;
    let client = builder_for(&server)
        .state_lease(Duration::ZERO)
        .build();
    client.login().await.unwrap();

    let mut devices = client.list_devices().await.unwrap();
    assert!(devices[0].is_power_on().await.unwrap());
}

#[tokio::test]
async fn capabilities_fetched_once_and_reused() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_state(&server, state_body()).await;
    Mock::given(method("POST"))
        .and(path("/unitcapabilities.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(caps_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let device = &mut devices[0];

    let caps = device.capabilities().await.unwrap();
    assert_eq!(caps.model.as_deref(), Some("MSZ-AP50VGD"));
    assert!(caps.half_degree_steps);
    // Repeated accessor reads must not re-fetch capabilities.
    device.fan_options().await.unwrap();
    device.vertical_vane_options().await.unwrap();
}

#[tokio::test]
async fn command_posts_token_with_local_flag() {
    let server = MockServer::start().await;
    standard_mocks(&server).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("PW0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    devices[0].power_off().await.expect("command should succeed");
}

#[tokio::test]
async fn command_while_stale_refreshes_state_first() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    // Exactly two plain state fetches: discovery + the pre-command refresh.
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .respond_with(ResponseTemplate::new(200).set_body_json(state_body()))
        .expect(2)
        .mount(&server)
        .await;

    mount_login(&server).await;
    let client = builder_for(&server)
        .state_lease(Duration::ZERO)
        .build();
    client.login().await.unwrap();

    let mut devices = client.list_devices().await.unwrap();
    devices[0].power_off().await.expect("command should succeed");
}

#[tokio::test]
async fn single_401_relogs_in_and_retries_once() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_state(&server, state_body()).await;
    // First capability fetch is rejected, the retry succeeds.
    Mock::given(method("POST"))
        .and(path("/unitcapabilities.aspx"))
        .respond_with(ResponseTemplate::new(401))
        .with_priority(1)
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_caps(&server, caps_body()).await;
    // Initial login plus exactly one re-login.
    Mock::given(method("POST"))
        .and(path("/login.aspx"))
        .respond_with(login_response())
        .expect(2)
        .mount(&server)
        .await;

    let client = builder_for(&server).build();
    client.login().await.unwrap();
    let devices = client.list_devices().await.expect("retry should recover");
    assert_eq!(devices.len(), 1);
}

#[tokio::test]
async fn second_401_terminates_with_auth_failure() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    Mock::given(method("POST"))
        .and(path("/unitcapabilities.aspx"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    // No retry loop: initial login plus exactly one re-login.
    Mock::given(method("POST"))
        .and(path("/login.aspx"))
        .respond_with(login_response())
        .expect(2)
        .mount(&server)
        .await;

    let client = builder_for(&server).build();
    client.login().await.unwrap();
    let err = client.list_devices().await.unwrap_err();
    assert!(matches!(err, Error::AuthFailed(_)), "expected AuthFailed, got {err:?}");
}

#[tokio::test]
async fn non_200_status_is_terminal() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rooms.aspx"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let err = client.list_devices().await.unwrap_err();
    assert!(
        matches!(err, Error::UnexpectedStatus(503)),
        "expected UnexpectedStatus(503), got {err:?}"
    );
}

#[tokio::test]
async fn comm_fault_surfaces_gateway_offline() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    let mut body = state_body();
    body["fault"] = json!("COMM");
    mount_state(&server, body).await;

    let client = logged_in(&server).await;
    let err = client.list_devices().await.unwrap_err();
    assert!(
        matches!(err, Error::GatewayOffline),
        "expected GatewayOffline, got {err:?}"
    );
}

#[tokio::test]
async fn temperature_outside_range_rejected_before_any_request() {
    let server = MockServer::start().await;
    standard_mocks(&server).await;
    // Only the in-range command may reach the wire.
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("TS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let device = &mut devices[0];

    device.set_temperature(22.5).await.expect("22.5 is within [16, 31]");

    let err = device.set_temperature(32.0).await.unwrap_err();
    match err {
        Error::TemperatureOutOfRange { requested, min, max } => {
            assert_eq!(requested, 32.0);
            assert_eq!(min, 16.0);
            assert_eq!(max, 31.0);
        }
        other => panic!("expected TemperatureOutOfRange, got {other:?}"),
    }
}

#[tokio::test]
async fn local_token_relayed_to_device_lan_address() {
    let server = MockServer::start().await;
    let local = MockServer::start().await;

    mount_rooms(&server, rooms_body()).await;
    let mut caps = caps_body();
    caps["localip"] = json!(local.address().to_string());
    mount_caps(&server, caps).await;
    mount_state(&server, state_body()).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("PW1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "ok", "lc": "0907PW1" })),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    // Exactly one secondary delivery, carrying the ESV envelope.
    Mock::given(method("POST"))
        .and(path("/smart"))
        .and(body_string_contains("<ESV>0907PW1</ESV>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&local)
        .await;

    mount_login(&server).await;
    let client = builder_for(&server).local_control(true).build();
    client.login().await.unwrap();

    let mut devices = client.list_devices().await.unwrap();
    devices[0].power_on().await.expect("command should succeed");
}

#[tokio::test]
async fn failed_local_delivery_does_not_fail_the_command() {
    let server = MockServer::start().await;

    mount_rooms(&server, rooms_body()).await;
    let mut caps = caps_body();
    // Nothing listens here; the local POST fails fast.
    caps["localip"] = json!("127.0.0.1:1");
    mount_caps(&server, caps).await;
    mount_state(&server, state_body()).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("PW1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "ok", "lc": "0907PW1" })),
        )
        .with_priority(1)
        .mount(&server)
        .await;

    mount_login(&server).await;
    let client = builder_for(&server).local_control(true).build();
    client.login().await.unwrap();

    let mut devices = client.list_devices().await.unwrap();
    devices[0]
        .power_on()
        .await
        .expect("cloud confirmation is authoritative");
}

#[tokio::test]
async fn fan_options_match_capability_report() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    let mut caps = caps_body();
    caps["hasautofan"] = json!(0);
    mount_caps(&server, caps).await;
    mount_state(&server, state_body()).await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let options = devices[0].fan_options().await.unwrap();
    assert_eq!(options, vec!["low", "medium", "high"]);

    let err = devices[0].set_fan_speed("auto").await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedFanSpeed(_)));
}

#[tokio::test]
async fn vane_options_exclude_undeclared_codes() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    let mut caps = caps_body();
    caps["hasswing"] = json!(0);
    caps["hasairauto"] = json!(0);
    mount_caps(&server, caps).await;
    mount_state(&server, state_body()).await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let device = &mut devices[0];

    let options = device.vertical_vane_options().await.unwrap();
    assert_eq!(options, vec!["1", "2", "3", "4", "5"]);

    let err = device.set_vertical_vane("Swing").await.unwrap_err();
    assert!(matches!(err, Error::UnsupportedVanePosition(_)));
    // No horizontal vane on this unit at all.
    assert!(device.horizontal_vane_options().await.unwrap().is_empty());
    assert_eq!(device.horizontal_vane().await.unwrap(), None);
}

#[tokio::test]
async fn unknown_fan_code_reads_as_auto() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    let mut state = state_body();
    state["setfan"] = json!(9);
    mount_state(&server, state).await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    assert_eq!(devices[0].fan_speed().await.unwrap(), "auto");
}

#[tokio::test]
async fn missing_settemp_is_a_decode_error() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    let mut state = state_body();
    state.as_object_mut().unwrap().remove("settemp");
    mount_state(&server, state).await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let err = devices[0].target_temperature().await.unwrap_err();
    assert!(matches!(err, Error::Decode(_)), "expected Decode, got {err:?}");
}

#[tokio::test]
async fn zones_replaced_wholesale_on_refresh() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    mount_state(&server, state_body()).await;

    mount_login(&server).await;
    let client = builder_for(&server)
        .state_lease(Duration::ZERO)
        .build();
    client.login().await.unwrap();
    let mut devices = client.list_devices().await.unwrap();
    let device = &mut devices[0];

    let zones = device.zones().await.unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].name, "Living");
    assert!(zones[0].active);

    // Next refresh reports a different zone set; the old one is gone.
    server.reset().await;
    mount_login(&server).await;
    let mut state = state_body();
    state["zones"] = json!([{ "zoneid": 2, "name": "Bedroom", "status": 0 }]);
    mount_state(&server, state).await;

    let zones = device.zones().await.unwrap();
    assert_eq!(zones.len(), 1);
    assert_eq!(zones[0].id, 2);
    assert!(!zones[0].active);
}

#[tokio::test]
async fn zone_toggle_commands() {
    let server = MockServer::start().await;
    standard_mocks(&server).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("Z11"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("Z10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    devices[0].enable_zone(1).await.unwrap();
    devices[0].disable_zone(1).await.unwrap();
}

#[tokio::test]
async fn set_mode_powers_unit_on_first() {
    let server = MockServer::start().await;
    mount_rooms(&server, rooms_body()).await;
    mount_caps(&server, caps_body()).await;
    let mut state = state_body();
    state["power"] = json!(0);
    mount_state(&server, state).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("PW1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("MD3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    devices[0].set_mode(Mode::Cool).await.unwrap();
}

#[tokio::test]
async fn lossnay_preset_sends_mode_code() {
    let server = MockServer::start().await;
    standard_mocks(&server).await;
    Mock::given(method("POST"))
        .and(path("/unitcommand.aspx"))
        .and(body_string_contains("MD7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "error": "ok" })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    devices[0].set_lossnay_preset("Bypass").await.unwrap();

    let err = devices[0].set_lossnay_preset("Eco").await.unwrap_err();
    assert!(matches!(err, Error::UnknownPreset(_)));
}

#[tokio::test]
async fn orphaned_device_refuses_all_operations() {
    let server = MockServer::start().await;
    standard_mocks(&server).await;

    let client = logged_in(&server).await;
    let mut devices = client.list_devices().await.unwrap();
    let device = &mut devices[0];
    device.mark_orphaned();
    assert!(device.is_orphaned());

    let err = device.refresh_state().await.unwrap_err();
    assert!(matches!(err, Error::DeviceOrphaned(42)));
    let err = device.power_on().await.unwrap_err();
    assert!(matches!(err, Error::DeviceOrphaned(42)));
}
