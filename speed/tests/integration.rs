/**
 * Integration tests for Speed Daemon.
 * Unit test belong at the bottom of source files.
 */

#[cfg(test)]
mod test {
    use speed::{Application, ServerOutput};
    use std::time::{Duration, Instant};
    use testing::{
        assert_client_not_receives_bytes, assert_client_receives_bytes, connect, listen_on_available_port,
        read_exactly, read_until_closed, send_bytes_from, u8s_to_hex_str, DEFAULT_TIMEOUT,
    };
    use tokio::sync::oneshot;
    use tokio::time::{sleep, timeout};

    const SETTLE: Duration = Duration::from_millis(100);

    async fn setup() -> u16 {
        let (listener, port) = listen_on_available_port().await;
        tokio::spawn(Application::new(listener).run());
        port
    }

    fn error_frame(message: &str) -> String {
        u8s_to_hex_str(&ServerOutput::Error(message.to_string()).to_bytes().unwrap())
    }

    #[tokio::test]
    async fn no_heartbeat() {
        let port = setup().await;
        let mut client = connect(port).await;

        send_bytes_from!(client, "40 00 00 00 00");
        assert_client_not_receives_bytes!(client, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn some_heartbeat() {
        let port = setup().await;
        let mut client = connect(port).await;

        send_bytes_from!(client, "40 00 00 00 0a");
        assert_client_receives_bytes!(client, "41", Duration::from_millis(1500));
        assert_client_receives_bytes!(client, "41", Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn heartbeat_cadence() {
        let port = setup().await;
        let mut client = connect(port).await;

        let started = Instant::now();
        send_bytes_from!(client, "40 00 00 00 01");
        assert_client_receives_bytes!(client, "41 41 41 41 41");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(450), "heartbeats too fast: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "heartbeats too slow: {elapsed:?}");
    }

    #[tokio::test]
    async fn car() {
        let port = setup().await;
        let mut camera_one = connect(port).await;
        let mut camera_two = connect(port).await;
        let mut dispatcher = connect(port).await;

        send_bytes_from!(camera_one, "80 03 11 0c 9d 00 64");
        send_bytes_from!(camera_two, "80 03 11 0c a7 00 64");
        send_bytes_from!(dispatcher, "81 01");
        send_bytes_from!(camera_one, "20 07 56 48 30 30 4a 52 57 00 0a 61 0d");
        send_bytes_from!(camera_two, "20 07 56 48 30 30 4a 52 57 00 0a 62 39");
        send_bytes_from!(dispatcher, "03 11");

        assert_client_receives_bytes!(
            dispatcher,
            "21 07 56 48 30 30 4a 52 57 03 11 0c 9d 00 0a 61 0d 0c a7 00 0a 62 39 2e e0"
        );
    }

    #[tokio::test]
    async fn ticket_held_until_dispatcher_connects() {
        let port = setup().await;
        let mut mile_eight = connect(port).await;
        let mut mile_nine = connect(port).await;
        let mut elsewhere = connect(port).await;

        send_bytes_from!(elsewhere, "81 01 00 7c");
        send_bytes_from!(mile_eight, "80 00 7b 00 08 00 3c");
        send_bytes_from!(mile_nine, "80 00 7b 00 09 00 3c");
        send_bytes_from!(mile_eight, "20 04 55 4e 31 58 00 00 00 00");
        send_bytes_from!(mile_nine, "20 04 55 4e 31 58 00 00 00 2d");
        assert_client_not_receives_bytes!(elsewhere, Duration::from_millis(300));

        let mut dispatcher = connect(port).await;
        send_bytes_from!(dispatcher, "81 01 00 7b");
        assert_client_receives_bytes!(
            dispatcher,
            "21 04 55 4e 31 58 00 7b 00 08 00 00 00 00 00 09 00 00 00 2d 1f 40"
        );
        assert_client_not_receives_bytes!(dispatcher, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn multiple_tickets() {
        let port = setup().await;

        let mut broken_camera = connect(port).await;
        send_bytes_from!(broken_camera, "80 00 00");

        let mut first_camera = connect(port).await;
        send_bytes_from!(first_camera, "80 1a 47 0d 18 00 50");
        let mut second_camera = connect(port).await;
        send_bytes_from!(second_camera, "80 1a 47 0d 23 00 50");
        let mut third_camera = connect(port).await;
        send_bytes_from!(third_camera, "80 1a 47 0d 2e 00 50");

        let mut dispatcher = connect(port).await;
        send_bytes_from!(dispatcher, "81 01");

        send_bytes_from!(second_camera, "20 07 52 56 36 30 55 58 50 02 16 d0 8f");
        send_bytes_from!(dispatcher, "1a 47");
        sleep(SETTLE).await;
        send_bytes_from!(first_camera, "20 07 52 56 36 30 55 58 50 02 16 cf 61");
        sleep(SETTLE).await;
        send_bytes_from!(third_camera, "20 07 52 56 36 30 55 58 50 02 16 d1 a9");

        assert_client_receives_bytes!(
            dispatcher,
            "21 07 52 56 36 30 55 58 50 1a 47 0d 18 02 16 cf 61 0d 23 02 16 d0 8f 33 39"
        );
        // Same plate, same day: the second violation is not ticketed.
        assert_client_not_receives_bytes!(dispatcher, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn multiple_cars() {
        let port = setup().await;
        let mut first_camera = connect(port).await;
        let mut second_camera = connect(port).await;
        let mut dispatcher = connect(port).await;

        send_bytes_from!(first_camera, "80 a7 22 00 0a 00 3c");
        send_bytes_from!(second_camera, "80 a7 22 04 ca 00 3c");
        send_bytes_from!(second_camera, "20 07 4e 5a 37 38 51 59 55 00 f7 88 c4");
        send_bytes_from!(first_camera, "20 07 50 50 34 37 41 44 4c 00 f7 88 11");
        send_bytes_from!(dispatcher, "81 01");
        send_bytes_from!(dispatcher, "a7 22");
        send_bytes_from!(first_camera, "20 07 4e 5a 37 38 51 59 55 00 f8 b8 8d 20 07 4e 58 32 31 4a 51 53 00 f7 87 ad 20 07 59 4e 31 31 50 52 43 00 f7 89 5f 20 07 47 55 30 38 51 45 54 00 f7 88 36");
        send_bytes_from!(second_camera, "20 07 47 55 30 38 51 45 54 00 f8 74 5e 20 07 4e 58 32 31 4a 51 53 00 f8 32 ad 20 07 50 50 34 37 41 44 4c 00 f8 62 bc");

        // Cameras race each other, so tickets may arrive in any order.
        let received = read_exactly(&mut dispatcher, 3 * 25, DEFAULT_TIMEOUT).await;
        let mut tickets: Vec<String> = received.chunks(25).map(u8s_to_hex_str).collect();
        tickets.sort();
        assert_eq!(
            vec![
                "21 07 47 55 30 38 51 45 54 a7 22 00 0a 00 f7 88 36 04 ca 00 f8 74 5e 1c 49",
                "21 07 4e 58 32 31 4a 51 53 a7 22 00 0a 00 f7 87 ad 04 ca 00 f8 32 ad 27 10",
                "21 07 50 50 34 37 41 44 4c a7 22 00 0a 00 f7 88 11 04 ca 00 f8 62 bc 1e 8c",
            ],
            tickets
        );
        // NZ78QYU averaged 56mph on a 60mph road.
        assert_client_not_receives_bytes!(dispatcher, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn camera_cannot_become_dispatcher() {
        let port = setup().await;
        let mut client = connect(port).await;

        send_bytes_from!(client, "80 00 7b 00 08 00 3c");
        send_bytes_from!(client, "81 01 00 7b");
        let received = read_until_closed(&mut client, DEFAULT_TIMEOUT).await;
        assert_eq!(error_frame("already defined its type, cannot redefine"), u8s_to_hex_str(&received));
    }

    #[tokio::test]
    async fn dispatcher_cannot_report_plates() {
        let port = setup().await;
        let mut client = connect(port).await;

        send_bytes_from!(client, "81 01 00 7b 20 04 55 4e 31 58 00 00 00 00");
        let received = read_until_closed(&mut client, DEFAULT_TIMEOUT).await;
        assert_eq!(error_frame("only camera should report plates"), u8s_to_hex_str(&received));
    }

    #[tokio::test]
    async fn heartbeat_requested_twice() {
        let port = setup().await;
        let mut client = connect(port).await;

        send_bytes_from!(client, "40 00 00 00 00 40 00 00 00 00");
        let received = read_until_closed(&mut client, DEFAULT_TIMEOUT).await;
        assert_eq!(error_frame("already sent a heartbeat request"), u8s_to_hex_str(&received));
    }

    #[tokio::test]
    async fn unrecognized_message_type() {
        let port = setup().await;
        let mut client = connect(port).await;

        send_bytes_from!(client, "ff");
        let received = read_until_closed(&mut client, DEFAULT_TIMEOUT).await;
        assert_eq!(error_frame("unrecognized message type"), u8s_to_hex_str(&received));
    }

    #[tokio::test]
    async fn misbehaving_client_does_not_affect_others() {
        let port = setup().await;
        let mut dispatcher = connect(port).await;
        send_bytes_from!(dispatcher, "40 00 00 00 01 81 01 00 7b");

        let mut rogue = connect(port).await;
        send_bytes_from!(rogue, "20 04 55 4e 31 58 00 00 00 00");
        read_until_closed(&mut rogue, DEFAULT_TIMEOUT).await;

        // Heartbeats keep flowing to everyone else.
        assert_client_receives_bytes!(dispatcher, "41 41");
    }

    #[tokio::test]
    async fn shutdown_closes_every_connection() {
        let (listener, port) = listen_on_available_port().await;
        let (stop, stopped) = oneshot::channel::<()>();
        let application = tokio::spawn(Application::new(listener).run_until(async {
            _ = stopped.await;
        }));

        let mut camera = connect(port).await;
        let mut dispatcher = connect(port).await;
        send_bytes_from!(camera, "80 00 7b 00 08 00 3c");
        send_bytes_from!(dispatcher, "81 01 00 7b");
        sleep(SETTLE).await;

        stop.send(()).unwrap();
        let result = timeout(DEFAULT_TIMEOUT, application)
            .await
            .expect("Application did not shut down in time.")
            .expect("Application task panicked.");
        assert!(result.is_ok(), "shutdown returned {result:?}");
        assert!(read_until_closed(&mut camera, DEFAULT_TIMEOUT).await.is_empty());
        assert!(read_until_closed(&mut dispatcher, DEFAULT_TIMEOUT).await.is_empty());
    }
}
