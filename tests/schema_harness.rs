//! Every advertised `inputSchema` must be a valid JSON Schema, and a standard
//! validator must agree with ours on representative arguments.

use std::sync::Arc;

use jsonschema::validator_for;
use serde_json::{json, Value};

use mcp_toolbox_server::backends::fs::LocalFileSystem;
use mcp_toolbox_server::backends::http::ReqwestBackend;
use mcp_toolbox_server::backends::sqlite::SqliteBackend;
use mcp_toolbox_server::backends::weather::OpenMeteo;
use mcp_toolbox_server::dispatch::Deployment;
use mcp_toolbox_server::handlers::api::ApiDeployment;
use mcp_toolbox_server::handlers::database::DatabaseDeployment;
use mcp_toolbox_server::handlers::filesystem::FilesystemDeployment;
use mcp_toolbox_server::handlers::weather::WeatherDeployment;
use mcp_toolbox_server::schema;

fn advertised<D: Deployment>(deployment: &D) -> Vec<Value> {
    deployment.registry().list_operations()["tools"]
        .as_array()
        .unwrap()
        .clone()
}

fn assert_schemas_compile<D: Deployment>(deployment: &D) {
    for tool in advertised(deployment) {
        let schema = &tool["inputSchema"];
        assert_eq!(schema["type"], "object", "{} schema is not an object", tool["name"]);
        validator_for(schema).unwrap_or_else(|e| panic!("{} schema invalid: {e}", tool["name"]));
    }
}

/// Our validator and a JSON Schema validator must agree on `args`.
fn assert_agree<D: Deployment>(deployment: &D, tool: &str, args: Value, valid: bool) {
    let descriptor = deployment.registry().operation(tool).unwrap();
    let ours = schema::validate(&descriptor.schema, &args).is_empty();
    let theirs = validator_for(&descriptor.schema.to_json_schema()).unwrap().is_valid(&args);
    assert_eq!(ours, valid, "{tool}: our verdict on {args}");
    assert_eq!(theirs, valid, "{tool}: JSON Schema verdict on {args}");
}

#[test]
fn all_deployments_advertise_valid_schemas() {
    let tmp = tempfile::tempdir().unwrap();

    assert_schemas_compile(
        &ApiDeployment::new("https://api.test", None, Arc::new(ReqwestBackend::new().unwrap())).unwrap(),
    );
    assert_schemas_compile(
        &DatabaseDeployment::new(Arc::new(SqliteBackend::open_in_memory().unwrap())).unwrap(),
    );
    assert_schemas_compile(
        &FilesystemDeployment::new(vec![tmp.path().to_path_buf()], Arc::new(LocalFileSystem)).unwrap(),
    );
    assert_schemas_compile(
        &WeatherDeployment::new(Arc::new(OpenMeteo::new("https://weather.test").unwrap())).unwrap(),
    );
}

#[test]
fn validators_agree_on_weather_bounds() {
    let deployment =
        WeatherDeployment::new(Arc::new(OpenMeteo::new("https://weather.test").unwrap())).unwrap();

    assert_agree(&deployment, "get_weather", json!({ "latitude": 10, "longitude": 10 }), true);
    assert_agree(&deployment, "get_weather", json!({ "latitude": 90, "longitude": -180 }), true);
    assert_agree(&deployment, "get_weather", json!({ "latitude": 100, "longitude": 0 }), false);
    assert_agree(&deployment, "get_weather", json!({ "latitude": "10", "longitude": 0 }), false);
    assert_agree(&deployment, "get_weather", json!({ "latitude": 10 }), false);
}

#[test]
fn validators_agree_on_nested_shapes() {
    let database = DatabaseDeployment::new(Arc::new(SqliteBackend::open_in_memory().unwrap())).unwrap();
    assert_agree(&database, "execute", json!({ "sql": "SELECT ?", "params": [1, "a", null] }), true);
    assert_agree(&database, "execute", json!({ "sql": "SELECT ?", "params": [[1]] }), false);

    let api = ApiDeployment::new("https://api.test", None, Arc::new(ReqwestBackend::new().unwrap())).unwrap();
    assert_agree(&api, "api_get", json!({ "endpoint": "/a", "headers": { "X-A": "1" } }), true);
    assert_agree(&api, "api_get", json!({ "endpoint": "/a", "headers": { "X-A": 1 } }), false);
    assert_agree(&api, "api_post", json!({ "endpoint": "/a" }), false);
}
