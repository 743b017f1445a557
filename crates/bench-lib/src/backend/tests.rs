//! Driver tests against a scripted command runner
//!
//! These tests replay backend CLI output so lifecycle logic can be checked
//! without a container runtime on the test machine.

#[cfg(test)]
mod driver_tests {
    use crate::backend::{
        create_driver, parse_port_mapping, BackendDriver, BackendSettings, DiscoveryPolicy,
        DockerDriver, InterfaceNames, LxcDriver, XContainerDriver,
    };
    use crate::error::BenchError;
    use crate::exec::{CommandOutput, DryRunRunner, RecordingRunner, DRY_RUN_PROCESS};
    use crate::models::{BackendKind, PortMapping, ProcessKind, ProcessSpec};
    use crate::network::IpCommandResolver;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn docker_driver(runner: Arc<RecordingRunner>, config_dir: &TempDir) -> DockerDriver {
        DockerDriver::new(
            runner,
            InterfaceNames::new("eno1", "docker0"),
            DiscoveryPolicy::immediate(),
            config_dir.path().join("nginx.conf"),
        )
    }

    fn settings(config_dir: &TempDir) -> BackendSettings {
        BackendSettings {
            discovery: DiscoveryPolicy::immediate(),
            nginx_config_path: config_dir.path().join("nginx.conf"),
            launcher_dir: config_dir.path().to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_port_mapping() {
        let output = "80/tcp -> 0.0.0.0:32768\n80/tcp -> [::]:32768\n";
        assert_eq!(
            parse_port_mapping(output),
            Some(PortMapping {
                container_port: 80,
                host_port: 32768
            })
        );
    }

    #[test]
    fn test_parse_port_mapping_first_match_wins() {
        let output = "443/tcp -> [::]:32769\n11211/tcp -> 0.0.0.0:11101\n80/tcp -> 0.0.0.0:32770\n";
        assert_eq!(
            parse_port_mapping(output),
            Some(PortMapping {
                container_port: 11211,
                host_port: 11101
            })
        );
        assert_eq!(parse_port_mapping(""), None);
        assert_eq!(parse_port_mapping("80/udp -> 0.0.0.0:5000"), None);
    }

    #[tokio::test]
    async fn test_create_is_noop_when_running() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("docker inspect", CommandOutput::success("172.17.0.2\n"));
        let driver = docker_driver(runner.clone(), &dir);

        let spec = ProcessSpec::default_for(ProcessKind::WebServer);
        let address = driver.create(&spec, 2).await.unwrap();

        assert_eq!(address, Ipv4Addr::new(172, 17, 0, 2));
        assert!(runner.commands_starting_with("docker run").is_empty());
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_docker_create_web_server() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("docker inspect", CommandOutput::success("172.17.0.3\n"));
        runner.respond_once(
            "docker inspect",
            CommandOutput::failure(1, "Error: No such object: nginx_container"),
        );
        let driver = docker_driver(runner.clone(), &dir);

        let spec = ProcessSpec::default_for(ProcessKind::WebServer);
        let address = driver.create(&spec, 2).await.unwrap();
        assert_eq!(address, Ipv4Addr::new(172, 17, 0, 3));

        let runs = runner.commands_starting_with("docker run");
        assert_eq!(runs.len(), 1);
        let expected = format!(
            "docker run --name nginx_container -P --cpus=2 -v {}:/etc/nginx/nginx.conf:ro -d nginx",
            dir.path().join("nginx.conf").display()
        );
        assert_eq!(runs[0], expected);

        let written = std::fs::read_to_string(dir.path().join("nginx.conf")).unwrap();
        assert!(written.contains("worker_processes  1;"));
        assert!(written.contains("access_log off;"));
    }

    #[tokio::test]
    async fn test_docker_create_cache_publishes_port() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("docker inspect", CommandOutput::success("172.17.0.4"));
        runner.respond_once("docker inspect", CommandOutput::success(""));
        let driver = docker_driver(runner.clone(), &dir);

        let spec = ProcessSpec::default_for(ProcessKind::Cache);
        driver.create(&spec, 1).await.unwrap();

        assert_eq!(
            runner.commands_starting_with("docker run"),
            vec!["docker run --name memcached_container -p 0.0.0.0:11101:11211 --cpus=1 -d memcached -m 256"]
        );
        assert!(!dir.path().join("nginx.conf").exists());
    }

    #[tokio::test]
    async fn test_create_times_out_without_address() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("docker inspect", CommandOutput::success(""));
        let driver = docker_driver(runner.clone(), &dir);

        let spec = ProcessSpec::default_for(ProcessKind::Cache);
        let err = driver.create(&spec, 1).await.unwrap_err();
        assert!(matches!(err, BenchError::DiscoveryTimeout { ref name, .. } if name == "memcached_container"));
    }

    #[tokio::test]
    async fn test_discover_collapses_backend_errors() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "docker inspect",
            CommandOutput::failure(1, "Cannot connect to the Docker daemon"),
        );
        let driver = docker_driver(runner, &dir);

        assert_eq!(driver.discover("nginx_container").await, None);
        assert!(matches!(
            driver.try_discover("nginx_container").await,
            Err(BenchError::BackendUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_discover_missing_container_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "docker inspect",
            CommandOutput::failure(1, "Error: No such object: nginx_container"),
        );
        let driver = docker_driver(runner, &dir);

        assert!(matches!(driver.try_discover("nginx_container").await, Ok(None)));
    }

    #[tokio::test]
    async fn test_docker_discovers_first_of_several_networks() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("docker inspect", CommandOutput::success("172.17.0.2 172.18.0.3 \n"));
        let driver = docker_driver(runner.clone(), &dir);

        assert_eq!(
            driver.try_discover("nginx_container").await.unwrap(),
            Some(Ipv4Addr::new(172, 17, 0, 2))
        );
        assert!(runner.commands()[0].ends_with("{{.IPAddress}} {{end}} nginx_container"));
    }

    #[tokio::test]
    async fn test_docker_dry_run_launch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let driver = DockerDriver::new(
            Arc::new(DryRunRunner::new()),
            InterfaceNames::new("eno1", "docker0"),
            DiscoveryPolicy::immediate(),
            dir.path().join("nginx.conf"),
        );

        let spec = ProcessSpec::default_for(ProcessKind::WebServer);
        let address = driver.create(&spec, 1).await.unwrap();

        assert_eq!(address, DRY_RUN_PROCESS);
        assert!(!dir.path().join("nginx.conf").exists());
    }

    #[tokio::test]
    async fn test_docker_stop_and_destroy_ignore_failures() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("docker", CommandOutput::failure(1, "No such container"));
        let driver = docker_driver(runner.clone(), &dir);

        driver.stop("nginx_container").await;
        driver.destroy("nginx_container").await;

        assert_eq!(
            runner.commands(),
            vec!["docker stop nginx_container", "docker rm nginx_container"]
        );
    }

    #[tokio::test]
    async fn test_lxc_create_and_bootstrap() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("lxc-info", CommandOutput::success("10.0.3.15\nfe80::1\n"));
        runner.respond_once(
            "lxc-info",
            CommandOutput::failure(1, "nginx_container doesn't exist"),
        );
        let driver = LxcDriver::new(
            runner.clone(),
            InterfaceNames::new("eno1", "lxcbr0"),
            DiscoveryPolicy::immediate(),
            "ubuntu",
        );

        let spec = ProcessSpec::default_for(ProcessKind::WebServer);
        let address = driver.create(&spec, 2).await.unwrap();
        assert_eq!(address, Ipv4Addr::new(10, 0, 3, 15));

        let commands = runner.commands();
        assert_eq!(commands[1], "lxc-create --name nginx_container -t ubuntu");
        assert_eq!(commands[2], "lxc-start --name nginx_container -d");
        assert_eq!(
            runner.commands_starting_with("lxc-attach").len(),
            LxcDriver::bootstrap_commands(ProcessKind::WebServer).len()
        );
        assert!(commands
            .iter()
            .any(|c| c == "lxc-attach --name nginx_container -- /bin/sh -c sudo apt-get install -y nginx"));
        assert_eq!(driver.port_mapping("nginx_container").await, None);
    }

    #[tokio::test]
    async fn test_lxc_core_limit() {
        let runner = Arc::new(RecordingRunner::new());
        let driver = LxcDriver::new(
            runner.clone(),
            InterfaceNames::new("eno1", "lxcbr0"),
            DiscoveryPolicy::immediate(),
            "ubuntu",
        );

        driver.set_core_limit("memcached_container", 4).await.unwrap();
        assert_eq!(
            runner.commands(),
            vec!["lxc config set memcached_container limits.cpu 4"]
        );
    }

    #[tokio::test]
    async fn test_xcontainer_discovers_derived_address() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("xl domid", CommandOutput::success("7\n"));
        runner.respond(
            "ip -4 -o addr show dev xenbr0",
            CommandOutput::success("5: xenbr0    inet 10.10.1.254/24 brd 10.10.1.255 scope global xenbr0\n"),
        );
        let resolver = Arc::new(IpCommandResolver::new(runner.clone()));
        let driver = XContainerDriver::new(runner.clone(), resolver, &settings(&dir));

        assert_eq!(
            driver.discover("nginx_container").await,
            Some(Ipv4Addr::new(10, 10, 1, 0))
        );
    }

    #[tokio::test]
    async fn test_xcontainer_discover_collapses_toolstack_errors() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "xl domid",
            CommandOutput::failure(1, "libxl: error: Could not connect to the hypervisor"),
        );
        let resolver = Arc::new(IpCommandResolver::new(runner.clone()));
        let driver = XContainerDriver::new(runner.clone(), resolver, &settings(&dir));

        assert_eq!(driver.discover("nginx_container").await, None);
        assert!(matches!(
            driver.try_discover("nginx_container").await,
            Err(BenchError::BackendUnavailable { .. })
        ));
        // The bridge is not consulted when Xen cannot be queried
        assert!(runner.commands_starting_with("ip").is_empty());
    }

    #[tokio::test]
    async fn test_xcontainer_missing_guest_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond(
            "xl domid",
            CommandOutput::failure(
                1,
                "Can't get domid of domain name 'nginx_container', maybe this domain does not exist.",
            ),
        );
        let resolver = Arc::new(IpCommandResolver::new(runner.clone()));
        let driver = XContainerDriver::new(runner, resolver, &settings(&dir));

        assert!(matches!(driver.try_discover("nginx_container").await, Ok(None)));
    }

    #[tokio::test]
    async fn test_xcontainer_launch_sequence() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("xl domid", CommandOutput::success("3\n"));
        runner.respond_once("xl domid", CommandOutput::failure(1, "cannot find domain"));
        runner.respond(
            "docker inspect -f {{.NetworkSettings.IPAddress}}",
            CommandOutput::success("172.17.0.9\n"),
        );
        runner.respond_once(
            "docker inspect -f {{.NetworkSettings.IPAddress}}",
            CommandOutput::failure(1, "Error: No such object"),
        );
        runner.respond("docker inspect --format={{.Id}}", CommandOutput::success("sha256:abc\n"));
        runner.respond(
            "ip -4 -o addr show dev xenbr0",
            CommandOutput::success("5: xenbr0    inet 10.10.1.1/24 scope global xenbr0\n"),
        );
        let resolver = Arc::new(IpCommandResolver::new(runner.clone()));
        let driver = XContainerDriver::new(runner.clone(), resolver, &settings(&dir));

        let spec = ProcessSpec::default_for(ProcessKind::WebServer);
        let address = driver.create(&spec, 2).await.unwrap();
        assert_eq!(address, Ipv4Addr::new(10, 10, 1, 2));

        // Inner Docker container is started without a CPU flag
        let runs = runner.commands_starting_with("docker run");
        assert_eq!(runs.len(), 1);
        assert!(!runs[0].contains("--cpus"));
        assert_eq!(runner.commands_starting_with("docker stop nginx_container").len(), 1);

        let launch = runner
            .records()
            .into_iter()
            .find(|r| r.line.starts_with("python run.py"))
            .unwrap();
        assert_eq!(
            launch.line,
            "python run.py --id sha256:abc --ip 10.10.1.2 --hvm --name nginx_container --cpu=2"
        );
        assert_eq!(launch.cwd.as_deref(), Some(dir.path()));
    }

    #[tokio::test]
    async fn test_xcontainer_destroy_removes_guest_and_image_container() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let resolver = Arc::new(IpCommandResolver::new(runner.clone()));
        let driver = XContainerDriver::new(runner.clone(), resolver, &settings(&dir));

        driver.stop("nginx_container").await;
        driver.destroy("nginx_container").await;
        assert_eq!(
            runner.commands(),
            vec![
                "xl shutdown nginx_container",
                "xl destroy nginx_container",
                "docker rm nginx_container"
            ]
        );
    }

    #[tokio::test]
    async fn test_create_driver_selects_backend() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::new());
        let resolver = Arc::new(IpCommandResolver::new(runner.clone()));

        for kind in [BackendKind::Docker, BackendKind::Lxc, BackendKind::XContainer] {
            let driver = create_driver(kind, runner.clone(), resolver.clone(), &settings(&dir));
            assert_eq!(driver.kind(), kind);
        }

        let xen = create_driver(BackendKind::XContainer, runner, resolver, &settings(&dir));
        assert_eq!(xen.interfaces().bridge, "xenbr0");
        assert_eq!(xen.interfaces().machine, "em1");
    }
}
