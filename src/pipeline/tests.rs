#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::{self, BufReader, Cursor, Read};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;
    use tokio::sync::mpsc;

    use crate::binder::FieldBinder;
    use crate::classifier::Classifier;
    use crate::constants::CHECKPOINT_FILE_NAME;
    use crate::detector::DetectorRegistry;
    use crate::pipeline::chunk::run_writer;
    use crate::pipeline::{
        ChunkWriter, Counters, FileScanner, SiftConfig, SiftProcessor, WriterMessage,
    };

    /// Yields `data` and then fails instead of reporting end of file.
    struct FailingAfter {
        data: Cursor<Vec<u8>>,
    }

    impl Read for FailingAfter {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.data.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::Other, "device detached")),
                n => Ok(n),
            }
        }
    }

    fn test_config(output: &Path) -> SiftConfig {
        let mut config = SiftConfig::default();
        config.output_directory = output.to_path_buf();
        config.worker_count = 2;
        config.queue_capacity = 2;
        config.row_batch_size = 3;
        config
    }

    fn chunk_lines(dir: &Path) -> Vec<String> {
        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map(|entries| entries.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default();
        files.sort();
        files
            .iter()
            .flat_map(|path| {
                fs::read_to_string(path)
                    .unwrap()
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn test_config_validation() {
        let mut config = SiftConfig::default();
        assert!(config.validate().is_ok());

        config.worker_count = 1_000;
        assert!(config.validate().is_err());

        config.worker_count = 0;
        config.chunk_max_lines = 0;
        assert!(config.validate().is_err());

        config.chunk_max_lines = 10;
        config.queue_capacity = 0;
        assert!(config.validate().is_err());

        config.queue_capacity = 8;
        config.enabled_detectors.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_round_trip_and_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pii_sift_config.json");

        let created = SiftConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.chunk_max_lines, SiftConfig::default().chunk_max_lines);

        fs::write(&path, r#"{ "chunk_max_lines": 5, "enabled_detectors": ["mobile", "card"] }"#).unwrap();
        let loaded = SiftConfig::from_file(&path).unwrap();
        assert_eq!(loaded.chunk_max_lines, 5);
        assert_eq!(loaded.enabled_detectors.len(), 2);
        assert_eq!(loaded.queue_capacity, SiftConfig::default().queue_capacity);
        assert!(loaded.effective_workers() >= 1);
    }

    #[test]
    fn test_checkpoint_path_resolution() {
        let mut config = SiftConfig::default();
        config.output_directory = PathBuf::from("/out");
        assert_eq!(config.checkpoint_path(), PathBuf::from("/out").join(CHECKPOINT_FILE_NAME));
        config.checkpoint_file = PathBuf::from("/state/resume.log");
        assert_eq!(config.checkpoint_path(), PathBuf::from("/state/resume.log"));
    }

    #[tokio::test]
    async fn test_basic_processing() {
        let temp_dir = tempdir().unwrap();
        let input_dir = temp_dir.path().join("input");
        let output_dir = temp_dir.path().join("output");
        fs::create_dir_all(&input_dir).unwrap();

        let lines = [
            r#"req-id ; "mobileNo":"9876543210" blah ; /var/log/app.log"#,
            "GET /health 200 ; /data/9123456789/app.log",
            "callback to 9988776655 queued ; /var/log/q.log",
            "nothing to see here ; /var/log/app.log",
            "",
            "card=4111111111111111 ip=10.0.0.7 ; /var/log/pay.log",
        ];
        let input_file = input_dir.join("app_1.txt");
        fs::write(&input_file, lines.join("\n")).unwrap();

        let config = test_config(&output_dir);
        let mut processor = SiftProcessor::new(config.clone()).unwrap();
        let summary = processor.process(&[input_file]).await.unwrap();

        let counters = &summary.counters;
        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(counters.lines_scanned, 6);
        assert_eq!(counters.lines_blank, 1);
        assert_eq!(counters.lines_dropped_entirely, 1);
        assert_eq!(counters.lines_path_only, 1);
        assert_eq!(counters.total_matches, 5);
        assert_eq!(counters.extracted, 3);
        assert_eq!(counters.mirrored, 1);
        assert_eq!(counters.dropped_path_only, 1);
        assert!(summary.is_consistent());

        let extracted = chunk_lines(&config.extracted_dir());
        assert_eq!(extracted.len(), 3);
        assert_eq!(
            extracted[0],
            r#"req-id ; "mobileNo":"9876543210" blah ; /var/log/app.log ; mobileNo ; mobile_regex ; 9876543210"#
        );
        assert!(extracted.contains(&"card=4111111111111111 ip=10.0.0.7 ; /var/log/pay.log ; card ; card_regex ; 4111111111111111".to_string()));
        assert!(extracted.contains(&"card=4111111111111111 ip=10.0.0.7 ; /var/log/pay.log ; ip ; ip_regex ; 10.0.0.7".to_string()));

        let mirrored = chunk_lines(&config.mirrored_dir());
        assert_eq!(
            mirrored,
            vec!["callback to 9988776655 queued ; /var/log/q.log ; UNIDENTIFIED_FIELD ; mobile_regex ; 9988776655 ; reason=NO_FIELD_PATTERN"]
        );

        assert_eq!(summary.extracted_rows_written, 3);
        assert_eq!(summary.mirrored_rows_written, 1);
        assert_eq!(fs::read_to_string(config.checkpoint_path()).unwrap(), "app_1.txt\n");
        assert!(config.summary_path().exists());
    }

    #[tokio::test]
    async fn test_rotation_across_files() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        let mut inputs = Vec::new();
        for f in 0..3 {
            let path = temp_dir.path().join(format!("in_{}.txt", f));
            let body: Vec<String> = (0..9)
                .map(|n| format!("msisdn=98765{:02}{:03} ; /p", f, n))
                .collect();
            fs::write(&path, body.join("\n")).unwrap();
            inputs.push(path);
        }

        let mut config = test_config(&output_dir);
        config.chunk_max_lines = 10;
        let summary = SiftProcessor::new(config.clone())
            .unwrap()
            .process(&inputs)
            .await
            .unwrap();

        assert_eq!(summary.extracted_rows_written, 27);
        assert_eq!(summary.extracted_chunks_created, 3);
        for index in 1..=3 {
            let chunk = ChunkWriter::chunk_path(&config.extracted_dir(), "extracted", index);
            let count = fs::read_to_string(&chunk).unwrap().lines().count();
            assert!(count <= 10);
        }

        let mut rows = chunk_lines(&config.extracted_dir());
        for f in 0..3 {
            let prefix = format!("msisdn=98765{:02}", f);
            let own: Vec<&String> = rows.iter().filter(|row| row.starts_with(&prefix)).collect();
            assert_eq!(own.len(), 9);
            assert!(own.windows(2).all(|pair| pair[0] < pair[1]));
        }
        rows.sort();
        rows.dedup();
        assert_eq!(rows.len(), 27);
        assert!(!config.mirrored_dir().join("mirror_001.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_file_is_not_checkpointed() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        let good = temp_dir.path().join("good.txt");
        fs::write(&good, "phone=9876543210 ; /p\n").unwrap();
        let missing = temp_dir.path().join("missing.txt");

        let config = test_config(&output_dir);
        let summary = SiftProcessor::new(config.clone())
            .unwrap()
            .process(&[good, missing])
            .await
            .unwrap();

        assert_eq!(summary.files_processed, 2);
        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(summary.files_failed, 1);
        assert!(summary.has_failures());
        assert_eq!(summary.errors[0].0, "missing.txt");
        assert!(summary.errors[0].1.contains("failed to open"));
        assert_eq!(fs::read_to_string(config.checkpoint_path()).unwrap(), "good.txt\n");
    }

    #[tokio::test]
    async fn test_shutdown_before_scheduling() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        let input = temp_dir.path().join("a.txt");
        fs::write(&input, "phone=9876543210 ; /p\n").unwrap();

        let summary = SiftProcessor::new(test_config(&output_dir))
            .unwrap()
            .with_shutdown_signal(Arc::new(AtomicBool::new(true)))
            .process(&[input])
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert_eq!(summary.files_processed, 0);
        assert_eq!(summary.extracted_rows_written, 0);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decoded_lossily() {
        let temp_dir = tempdir().unwrap();
        let output_dir = temp_dir.path().join("output");
        let input = temp_dir.path().join("bytes.txt");
        let mut body = b"note \xff\xfe msisdn=9876543210 ; /p\n".to_vec();
        body.extend_from_slice(b"plain line\n");
        fs::write(&input, body).unwrap();

        let config = test_config(&output_dir);
        let summary = SiftProcessor::new(config.clone())
            .unwrap()
            .process(&[input])
            .await
            .unwrap();

        assert_eq!(summary.files_succeeded, 1);
        assert_eq!(summary.counters.extracted, 1);
        let rows = chunk_lines(&config.extracted_dir());
        assert!(rows[0].ends_with("msisdn ; mobile_regex ; 9876543210"));
    }

    #[test]
    fn test_partial_failure_forwards_nothing_and_retry_has_no_duplicates() {
        let temp_dir = tempdir().unwrap();
        let config = test_config(&temp_dir.path().join("output"));
        fs::create_dir_all(config.staging_dir()).unwrap();
        let body: String = (0..6)
            .map(|n| format!("msisdn=98765432{:02} ; /p\n", n))
            .collect();

        let classifier = Arc::new(Classifier::new(
            Arc::new(DetectorRegistry::with_all().unwrap()),
            Arc::new(FieldBinder::new(16)),
            config.mirror_content_max_chars,
        ));
        let (extracted_tx, extracted_rx) = mpsc::channel(config.queue_capacity);
        let (mirrored_tx, mirrored_rx) = mpsc::channel(config.queue_capacity);
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        let extracted = ChunkWriter::new(&config.extracted_dir(), "extracted", 100, 1024).unwrap();
        let mirrored = ChunkWriter::new(&config.mirrored_dir(), "mirror", 100, 1024).unwrap();
        let extracted_acks = ack_tx.clone();
        let extracted_writer =
            thread::spawn(move || run_writer(extracted_rx, extracted, extracted_acks));
        let mirrored_writer = thread::spawn(move || run_writer(mirrored_rx, mirrored, ack_tx));

        let scanner = FileScanner::new(classifier, extracted_tx.clone(), mirrored_tx.clone(), &config)
            .with_classify_batch_lines(2);
        let path = Path::new("/in/flaky.txt");

        let mut counters = Counters::default();
        let failing = BufReader::new(FailingAfter {
            data: Cursor::new(body.clone().into_bytes()),
        });
        let err = scanner.scan_reader(failing, path, 0, &mut counters).unwrap_err();
        assert!(format!("{:#}", err).contains("device detached"));
        assert_eq!(counters.extracted, 6);
        assert_eq!(extracted_tx.capacity(), config.queue_capacity);
        assert_eq!(fs::read_dir(config.staging_dir()).unwrap().count(), 0);

        scanner
            .scan_reader(Cursor::new(body.into_bytes()), path, 1, &mut Counters::default())
            .unwrap();
        drop(scanner);
        extracted_tx.blocking_send(WriterMessage::Shutdown).unwrap();
        mirrored_tx.blocking_send(WriterMessage::Shutdown).unwrap();

        let report = extracted_writer.join().unwrap().unwrap();
        mirrored_writer.join().unwrap().unwrap();
        assert_eq!(report.rows_written, 6);

        let rows = chunk_lines(&config.extracted_dir());
        let expected: Vec<String> = (0..6)
            .map(|n| format!("msisdn=98765432{0:02} ; /p ; msisdn ; mobile_regex ; 98765432{0:02}", n))
            .collect();
        assert_eq!(rows, expected);

        let mut acks = Vec::new();
        while let Ok(ack) = ack_rx.try_recv() {
            acks.push(ack);
        }
        assert_eq!(acks, vec![path.to_path_buf(), path.to_path_buf()]);
    }
}
