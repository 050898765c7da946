//! End-to-end tests against a mock Potion API.

use chrono::DateTime;
use mockito::{Matcher, Mock, Server};
use potion_client::{
    Client, ClientOptions, Data, Error, HttpStatusError, Instance, Outcome, OutputKind,
};
use serde_json::{json, Value};

fn root_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-04/hyper-schema#",
        "definitions": {
            "_pagination": {
                "type": "object",
                "properties": {
                    "page": {"type": "integer", "minimum": 1, "default": 1},
                    "per_page": {"type": "integer", "minimum": 1, "maximum": 100, "default": 20}
                }
            }
        },
        "properties": {
            "user": {"$ref": "/user/schema#", "description": "People"}
        }
    })
}

fn user_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-04/hyper-schema#",
        "type": "object",
        "properties": {
            "$uri": {"type": "string", "readOnly": true},
            "name": {"type": "string"},
            "age": {"type": ["integer", "null"]},
            "nickname": {"oneOf": [{"type": "integer"}, {"type": "string"}]},
            "created_at": {
                "type": "object",
                "properties": {"$date": {"type": "integer"}},
                "additionalProperties": false,
                "readOnly": true
            },
            "friend": {
                "type": "object",
                "properties": {"$ref": {"type": "string"}},
                "required": ["$ref"],
                "additionalProperties": false
            }
        },
        "required": ["name"],
        "links": [
            {"rel": "self", "href": "/user/{id}", "method": "GET", "targetSchema": {"$ref": "#"}},
            {
                "rel": "instances",
                "href": "/user",
                "method": "GET",
                "schema": {
                    "type": "object",
                    "properties": {
                        "where": {"type": "object"},
                        "page": {"type": "integer", "minimum": 1},
                        "per_page": {"type": "integer", "minimum": 1, "maximum": 100}
                    }
                },
                "targetSchema": {"type": "array", "items": {"$ref": "#"}}
            },
            {
                "rel": "create",
                "href": "/user",
                "method": "POST",
                "schema": {"$ref": "#"},
                "targetSchema": {"$ref": "#"}
            },
            {
                "rel": "update",
                "href": "/user/{id}",
                "method": "PATCH",
                "schema": {"$ref": "#"},
                "targetSchema": {"$ref": "#"}
            },
            {"rel": "destroy", "href": "/user/{id}", "method": "DELETE"},
            {
                "rel": "readGreeting",
                "href": "/user/{id}/greeting",
                "method": "GET",
                "targetSchema": {"type": "string"}
            }
        ]
    })
}

fn mock_schemas(server: &mut Server) -> (Mock, Mock) {
    let root = server
        .mock("GET", "/schema")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(root_schema().to_string())
        .expect(1)
        .create();
    let user = server
        .mock("GET", "/user/schema")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(user_schema().to_string())
        .expect(1)
        .create();
    (root, user)
}

fn mock_json(server: &mut Server, method: &str, path: &str, body: Value) -> Mock {
    server
        .mock(method, path)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
        .create()
}

fn connect(server: &Server) -> Client {
    Client::connect(ClientOptions::new(server.url())).unwrap()
}

fn page_of_users(range: std::ops::Range<usize>) -> Value {
    Value::Array(
        range
            .map(|i| json!({"$uri": format!("/user/{i}"), "name": format!("user {i}")}))
            .collect(),
    )
}

mod bootstrap {
    use super::*;

    #[test]
    fn builds_resource_types_from_root_schema() {
        let mut server = Server::new();
        let (root, user) = mock_schemas(&mut server);

        let client = connect(&server);

        root.assert();
        user.assert();
        let resources = client.resources();
        assert_eq!(resources.len(), 1);

        let user = client.resource("User").unwrap();
        assert_eq!(user, client.resource("user").unwrap());
        assert_eq!(user.type_name(), "User");
        assert_eq!(user.description(), Some("People"));
        assert!(user.is_required("name"));
        assert!(user.property("$uri").unwrap().is_read_only());
        assert_eq!(user.property("name").unwrap().summary(), "string");

        assert_eq!(user.link("self").unwrap().output_kind(), OutputKind::Instance);
        assert_eq!(user.link("instances").unwrap().output_kind(), OutputKind::Collection);
        assert_eq!(user.link("destroy").unwrap().output_kind(), OutputKind::Void);
        assert!(user.link("read_greeting").is_ok());
        assert!(matches!(
            user.link("nope"),
            Err(Error::UnknownLink { .. })
        ));
    }

    #[test]
    fn missing_root_schema_reports_status() {
        let mut server = Server::new();
        server.mock("GET", "/schema").with_status(404).create();

        let err = Client::connect(ClientOptions::new(server.url())).unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert_eq!(err.http_status(), Some(404));
    }

    #[test]
    fn unknown_resource() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let client = connect(&server);
        assert!(matches!(
            client.resource("Project"),
            Err(Error::UnknownResource { .. })
        ));
    }

    #[test]
    fn schema_refs_resolve_against_root() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let client = connect(&server);

        assert_eq!(client.pagination_ref(), "/schema#/definitions/_pagination");
        let pagination = client.resolve_schema(&client.pagination_ref()).unwrap();
        assert_eq!(pagination["properties"]["per_page"]["maximum"], 100);

        let local = client.resolve_schema("#/definitions/_pagination").unwrap();
        assert_eq!(local, pagination);
    }
}

mod instances {
    use super::*;

    #[test]
    fn fetch_is_identity_mapped() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let fetch = server
            .mock("GET", "/user/123")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"$uri": "/user/123", "name": "foo"}).to_string())
            .expect(2)
            .create();
        let client = connect(&server);
        let user = client.resource("User").unwrap();

        let first = user.fetch(123).unwrap();
        assert_eq!(first.get("name").unwrap(), Data::from("foo"));
        assert_eq!(first.id().as_deref(), Some("123"));
        assert_eq!(first.uri().as_deref(), Some("/user/123"));

        let second = user.fetch(123).unwrap();
        assert!(first.ptr_eq(&second));

        let resolved = client
            .resolve_element(&json!({"$uri": "/user/123"}))
            .unwrap();
        assert!(resolved.as_instance().unwrap().ptr_eq(&first));
        fetch.assert();
    }

    #[test]
    fn reference_only_instance_loads_on_first_read() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let fetch = mock_json(
            &mut server,
            "GET",
            "/user/5",
            json!({"$uri": "/user/5", "name": "lazy"}),
        );
        let client = connect(&server);

        let instance = client.instance("/user/5").unwrap();
        assert!(!instance.is_loaded());
        assert_eq!(instance.id().as_deref(), Some("5"));

        assert_eq!(instance.get("name").unwrap().as_str(), Some("lazy"));
        assert!(instance.is_loaded());
        fetch.assert();
    }

    #[test]
    fn not_found_and_bad_request() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        server
            .mock("GET", "/user/999")
            .with_status(404)
            .with_body(r#"{"status": 404, "message": "Not Found"}"#)
            .create();
        server
            .mock("POST", "/user")
            .with_status(400)
            .with_body("not a valid user")
            .create();
        let client = connect(&server);
        let user = client.resource("User").unwrap();

        match user.fetch(999) {
            Err(Error::Http(HttpStatusError::NotFound { body, .. })) => {
                assert!(body.contains("Not Found"))
            }
            other => panic!("expected NotFound, got {other:?}"),
        }

        let draft = user.build();
        draft.set("name", "bar").unwrap();
        let err = draft.save().unwrap_err();
        assert!(matches!(err, Error::Http(HttpStatusError::BadRequest { .. })));
        assert_eq!(err.http_status(), Some(400));
        assert_eq!(draft.id(), None);
    }

    #[test]
    fn create_then_update() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let create = server
            .mock("POST", "/user")
            .match_body(Matcher::Json(json!({"name": "bar", "age": 3})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "$uri": "/user/7",
                    "name": "bar",
                    "age": 3,
                    "created_at": {"$date": 1_433_173_842_123_i64}
                })
                .to_string(),
            )
            .expect(1)
            .create();
        let update = server
            .mock("PATCH", "/user/7")
            .match_body(Matcher::Json(json!({"name": "bar", "age": 4})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"$uri": "/user/7", "name": "bar", "age": 4}).to_string())
            .expect(1)
            .create();
        let client = connect(&server);
        let user = client.resource("User").unwrap();

        let draft = user.build();
        draft.set("name", "bar").unwrap();
        draft.set("age", 3).unwrap();
        draft.save().unwrap();
        create.assert();

        assert_eq!(draft.id().as_deref(), Some("7"));
        assert!(client.instance("/user/7").unwrap().ptr_eq(&draft));
        assert!(draft.get("created_at").unwrap().as_date().is_some());

        draft.set("age", 4).unwrap();
        draft.save().unwrap();
        update.assert();
        assert_eq!(draft.get("age").unwrap().as_i64(), Some(4));
        assert_eq!(draft.id().as_deref(), Some("7"));
    }

    #[test]
    fn destroy_leaves_identity_map() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        mock_json(&mut server, "GET", "/user/3", json!({"$uri": "/user/3", "name": "x"}));
        let destroy = server
            .mock("DELETE", "/user/3")
            .with_status(204)
            .expect(1)
            .create();
        let client = connect(&server);

        let instance = client.resource("User").unwrap().fetch(3).unwrap();
        assert_eq!(client.identity_map_len(), 1);
        instance.destroy().unwrap();
        destroy.assert();
        assert_eq!(client.identity_map_len(), 0);
    }
}

mod properties {
    use super::*;

    fn fetched(server: &mut Server, body: Value) -> (Client, Instance) {
        mock_schemas(server);
        mock_json(server, "GET", "/user/1", body);
        let client = connect(server);
        let instance = client.resource("User").unwrap().fetch(1).unwrap();
        (client, instance)
    }

    #[test]
    fn read_only_rejected_before_any_request() {
        let mut server = Server::new();
        let (_client, instance) = fetched(
            &mut server,
            json!({"$uri": "/user/1", "name": "foo"}),
        );
        let writes = server.mock("PATCH", Matcher::Any).expect(0).create();

        let now = DateTime::from_timestamp_millis(0).unwrap();
        assert!(matches!(
            instance.set("created_at", now),
            Err(Error::ReadOnlyProperty { .. })
        ));
        assert!(matches!(
            instance.set("$uri", "/user/2"),
            Err(Error::ReservedProperty { .. })
        ));
        writes.assert();
    }

    #[test]
    fn invalid_write_leaves_raw_value() {
        let mut server = Server::new();
        let (_client, instance) = fetched(
            &mut server,
            json!({"$uri": "/user/1", "name": "foo", "age": 30}),
        );

        assert!(matches!(
            instance.set("age", "thirty"),
            Err(Error::Validation { .. })
        ));
        assert_eq!(instance.raw_property("age"), Some(json!(30)));

        assert!(matches!(
            instance.set("name", 5),
            Err(Error::Validation { .. })
        ));
        assert_eq!(instance.get("name").unwrap().as_str(), Some("foo"));
    }

    #[test]
    fn one_of_picks_first_accepting_alternative() {
        let mut server = Server::new();
        let (_client, instance) = fetched(
            &mut server,
            json!({"$uri": "/user/1", "name": "foo"}),
        );

        instance.set("nickname", "b").unwrap();
        assert_eq!(instance.raw_property("nickname"), Some(json!("b")));
        instance.set("nickname", 7).unwrap();
        assert_eq!(instance.raw_property("nickname"), Some(json!(7)));
    }

    #[test]
    fn date_round_trip() {
        let mut server = Server::new();
        let (_client, instance) = fetched(
            &mut server,
            json!({
                "$uri": "/user/1",
                "name": "foo",
                "created_at": {"$date": 1_433_173_842_123_i64}
            }),
        );

        let created = instance.get("created_at").unwrap();
        let created = created.as_date().unwrap();
        assert_eq!(created.timestamp_millis(), 1_433_173_842_123);
        assert_eq!(
            Data::Date(*created).to_json().unwrap(),
            json!({"$date": 1_433_173_842_123_i64})
        );
    }

    #[test]
    fn references_resolve_through_identity_map() {
        let mut server = Server::new();
        let (client, instance) = fetched(
            &mut server,
            json!({"$uri": "/user/1", "name": "foo", "friend": {"$ref": "/user/2"}}),
        );
        let friend_fetch = mock_json(
            &mut server,
            "GET",
            "/user/2",
            json!({"$uri": "/user/2", "name": "bar"}),
        );

        let friend = instance.get("friend").unwrap();
        let friend = friend.as_instance().unwrap();
        assert!(friend.ptr_eq(&client.instance("/user/2").unwrap()));
        assert_eq!(friend.get("name").unwrap().as_str(), Some("bar"));
        friend_fetch.assert();

        // Writing a reference encodes it back to {"$ref": uri}.
        instance.set("friend", &instance).unwrap();
        assert_eq!(
            instance.raw_property("friend"),
            Some(json!({"$ref": "/user/1"}))
        );

        let unsaved = client.resource("User").unwrap().build();
        assert!(matches!(
            instance.set("friend", unsaved),
            Err(Error::UnsavedReference { .. })
        ));
    }

    #[test]
    fn undeclared_names_stay_local() {
        let mut server = Server::new();
        let (_client, instance) = fetched(
            &mut server,
            json!({"$uri": "/user/1", "name": "foo"}),
        );

        instance.set("scratch", 42).unwrap();
        assert_eq!(instance.get("scratch").unwrap().as_i64(), Some(42));
        assert!(instance.to_json().get("scratch").is_none());
        assert!(matches!(
            instance.get("missing"),
            Err(Error::UnknownProperty { .. })
        ));
    }
}

mod links {
    use super::*;

    #[test]
    fn instance_scoped_link_needs_instance_or_params() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        mock_json(&mut server, "GET", "/user/9", json!({"$uri": "/user/9", "name": "nine"}));
        let client = connect(&server);
        let user = client.resource("User").unwrap();

        assert!(matches!(
            user.link("self").unwrap().call(),
            Err(Error::Usage { .. })
        ));

        let outcome = user.link("self").unwrap().param("id", 9).unwrap().call().unwrap();
        let instance = outcome.into_instance().unwrap();
        assert_eq!(instance.uri().as_deref(), Some("/user/9"));
        assert!(instance.ptr_eq(&client.instance("/user/9").unwrap()));
    }

    #[test]
    fn bound_link_returns_scalar() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        mock_json(&mut server, "GET", "/user/1", json!({"$uri": "/user/1", "name": "foo"}));
        mock_json(&mut server, "GET", "/user/1/greeting", json!("hello foo"));
        let client = connect(&server);
        let instance = client.resource("User").unwrap().fetch(1).unwrap();

        let outcome = instance.link("read_greeting").unwrap().call().unwrap();
        assert_eq!(outcome.into_data(), Some(Data::from("hello foo")));
    }

    #[test]
    fn void_link_returns_nothing() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        mock_json(&mut server, "GET", "/user/1", json!({"$uri": "/user/1", "name": "foo"}));
        server.mock("DELETE", "/user/1").with_status(204).create();
        let client = connect(&server);
        let instance = client.resource("User").unwrap().fetch(1).unwrap();

        let outcome = instance.link("destroy").unwrap().call().unwrap();
        assert!(outcome.is_void());
    }

    #[test]
    fn proxies_are_persistent() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let client = connect(&server);
        let base = client.resource("User").unwrap().link("instances").unwrap();

        let filtered = base.param("where", json!({"name": "foo"})).unwrap();
        let paged = base.per_page(5).unwrap();
        let both = filtered.per_page(5).unwrap();

        assert!(base.params().is_empty());
        assert_eq!(filtered.params().len(), 1);
        assert_eq!(paged.params().get("per_page"), Some(&json!(5)));
        assert!(paged.params().get("where").is_none());
        assert_eq!(both.params().len(), 2);

        assert!(matches!(base.per_page(0), Err(Error::Validation { .. })));
        assert!(matches!(base.call().unwrap(), Outcome::Collection(_)));
    }
}

mod collections {
    use super::*;

    fn link_header(page: usize, last: usize) -> String {
        let mut links = vec![
            "</user?page=1&per_page=20>; rel=\"first\"".to_string(),
            format!("</user?page={page}&per_page=20>; rel=\"self\""),
        ];
        if page < last {
            links.push(format!("</user?page={}&per_page=20>; rel=\"next\"", page + 1));
        }
        links.push(format!("</user?page={last}&per_page=20>; rel=\"last\""));
        links.join(", ")
    }

    fn page_query(page: usize) -> Matcher {
        Matcher::AllOf(vec![
            Matcher::UrlEncoded("page".into(), page.to_string()),
            Matcher::UrlEncoded("per_page".into(), "20".into()),
        ])
    }

    /// One page of a 35 user listing, served `hits` times.
    fn mock_page(server: &mut Server, query: Matcher, page: usize, hits: usize) -> Mock {
        let users = if page == 1 { 0..20 } else { 20..35 };
        server
            .mock("GET", "/user")
            .match_query(query)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_header("X-Total-Count", "35")
            .with_header("Link", &link_header(page, 2))
            .with_body(page_of_users(users).to_string())
            .expect(hits)
            .create()
    }

    fn mock_pages(server: &mut Server) -> (Mock, Mock) {
        let first = mock_page(server, Matcher::Regex("^per_page=20$".into()), 1, 1);
        let second = mock_page(server, page_query(2), 2, 1);
        (first, second)
    }

    fn uris(items: Vec<Data>) -> Vec<String> {
        items
            .iter()
            .map(|d| d.as_instance().unwrap().uri().unwrap())
            .collect()
    }

    #[test]
    fn nothing_fetched_until_used() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let listing = server
            .mock("GET", "/user")
            .match_query(Matcher::Any)
            .expect(0)
            .create();
        let client = connect(&server);

        let users = client.resource("User").unwrap().instances().unwrap();
        let users = users.per_page(20).unwrap();
        assert!(!users.is_loaded());
        listing.assert();
    }

    #[test]
    fn indexing_fetches_at_most_two_pages() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let (first, second) = mock_pages(&mut server);
        let client = connect(&server);

        let users = client
            .resource("User")
            .unwrap()
            .instances()
            .unwrap()
            .per_page(20)
            .unwrap();

        assert_eq!(users.len().unwrap(), 35);
        assert_eq!(users.page_len().unwrap(), 20);
        for i in 0..35 {
            let item = users.get(i).unwrap();
            let instance = item.as_instance().unwrap();
            assert_eq!(instance.uri(), Some(format!("/user/{i}")));
        }
        assert_eq!(users.len().unwrap(), 35);

        assert!(matches!(
            users.get(35),
            Err(Error::IndexOutOfRange { index: 35, total: 35 })
        ));
        first.assert();
        second.assert();
    }

    #[test]
    fn iteration_follows_next_links() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let (first, second) = mock_pages(&mut server);
        let client = connect(&server);

        let users = client
            .resource("User")
            .unwrap()
            .instances()
            .unwrap()
            .per_page(20)
            .unwrap();

        let all = users.to_vec().unwrap();
        assert_eq!(all.len(), 35);
        let names: Vec<_> = all
            .iter()
            .map(|d| d.as_instance().unwrap().get("name").unwrap())
            .collect();
        assert_eq!(names[0], Data::from("user 0"));
        assert_eq!(names[34], Data::from("user 34"));
        first.assert();
        second.assert();
    }

    #[test]
    fn iterating_twice_restarts_from_first_page() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        // The loaded first page is reused; only page 2 is fetched per pass.
        let first = mock_page(&mut server, Matcher::Regex("^per_page=20$".into()), 1, 1);
        let second = mock_page(&mut server, page_query(2), 2, 2);
        let client = connect(&server);

        let users = client
            .resource("User")
            .unwrap()
            .instances()
            .unwrap()
            .per_page(20)
            .unwrap();

        let once = uris(users.to_vec().unwrap());
        let twice = uris(users.to_vec().unwrap());
        assert_eq!(once.len(), 35);
        assert_eq!(once[0], "/user/0");
        assert_eq!(once[34], "/user/34");
        assert_eq!(once, twice);
        first.assert();
        second.assert();
    }

    #[test]
    fn iteration_after_indexing_restarts_from_first_page() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let initial = mock_page(&mut server, Matcher::Regex("^per_page=20$".into()), 1, 1);
        let second = mock_page(&mut server, page_query(2), 2, 2);
        let first = mock_page(&mut server, page_query(1), 1, 1);
        let client = connect(&server);

        let users = client
            .resource("User")
            .unwrap()
            .instances()
            .unwrap()
            .per_page(20)
            .unwrap();

        // Page 2 replaces the loaded page.
        let item = users.get(30).unwrap();
        let uri = item.as_instance().unwrap().uri();
        assert_eq!(uri.as_deref(), Some("/user/30"));

        let all = uris(users.to_vec().unwrap());
        assert_eq!(all.len(), 35);
        assert_eq!(all[0], "/user/0");
        assert_eq!(all[34], "/user/34");
        initial.assert();
        second.assert();
        first.assert();
    }

    #[test]
    fn items_are_identity_mapped() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        mock_pages(&mut server);
        let client = connect(&server);

        let users = client
            .resource("User")
            .unwrap()
            .instances()
            .unwrap()
            .per_page(20)
            .unwrap();
        let a = users.get(3).unwrap();
        let b = users.get(3).unwrap();
        assert!(a.as_instance().unwrap().ptr_eq(b.as_instance().unwrap()));
        assert!(a
            .as_instance()
            .unwrap()
            .ptr_eq(&client.instance("/user/3").unwrap()));
    }

    #[test]
    fn unpaginated_list_uses_item_count() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        server
            .mock("GET", "/user")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_of_users(0..3).to_string())
            .expect(1)
            .create();
        let client = connect(&server);

        let users = client.resource("User").unwrap().instances().unwrap();
        assert_eq!(users.len().unwrap(), 3);
        assert_eq!(users.iter().count(), 3);
        assert!(users.get(3).is_err());
    }

    #[test]
    fn filter_sent_as_json_query_parameter() {
        let mut server = Server::new();
        mock_schemas(&mut server);
        let filtered = server
            .mock("GET", "/user")
            .match_query(Matcher::UrlEncoded(
                "where".into(),
                r#"{"name":"user 1"}"#.into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(page_of_users(1..2).to_string())
            .expect(1)
            .create();
        let client = connect(&server);

        let users = client
            .resource("User")
            .unwrap()
            .instances()
            .unwrap()
            .param("where", json!({"name": "user 1"}))
            .unwrap();
        assert_eq!(users.len().unwrap(), 1);
        filtered.assert();
    }
}
