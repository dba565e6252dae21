fn main() {
    println!("Run `cargo test -p recovery-compat` to execute recovery round-trip tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use barge_engine::{
        ActiveHandlesFuture, MultipartUploadClient, MultipartUploadSession, PartUploadRequest,
        TransferDatabase, TransferEvent, TransferKind, TransferOptions, TransferProxy,
        TransferStore, TransferTask, TransportHandle, TransportLister,
    };
    use barge_protocol::{HandleId, PartNumber, TransferStatus, UploadId};
    use barge_transfer::{
        MultipartUpload, MultipartUploadEvent, UploadFile, UploadPart, UploadPartEvent,
    };

    const MIB: u64 = 1024 * 1024;

    struct StubHandle(HandleId);

    impl TransportHandle for StubHandle {
        fn id(&self) -> HandleId {
            self.0
        }

        fn resume(&self) {}

        fn suspend(&self) {}

        fn cancel(&self) {}
    }

    struct StubLister {
        handles: Vec<HandleId>,
    }

    impl TransportLister for StubLister {
        fn active_handles(&self) -> ActiveHandlesFuture<'_> {
            let handles: Vec<Arc<dyn TransportHandle>> = self
                .handles
                .iter()
                .map(|&id| Arc::new(StubHandle(id)) as Arc<dyn TransportHandle>)
                .collect();
            Box::pin(async move { handles })
        }
    }

    fn multipart_kind() -> TransferKind {
        TransferKind::MultipartUpload {
            on_event: Arc::new(|_: TransferEvent<()>| {}),
        }
    }

    /// Seeds a database directory with the state of an interrupted
    /// 12 MiB multipart upload: part 1 completed, part 2 in flight on
    /// transport handle 43, part 3 untouched.
    fn seed_interrupted_upload(dir: &std::path::Path, upload_id: &UploadId) -> String {
        let db = TransferDatabase::new(dir).unwrap();

        let parent = TransferTask::new(
            multipart_kind(),
            "my-bucket",
            "objects/archive.bin",
            TransferOptions::default(),
            db.as_store(),
        );

        let mut upload = MultipartUpload::None;
        upload
            .transition(MultipartUploadEvent::Created {
                upload_id: upload_id.clone(),
                file: UploadFile::new("/tmp/archive.bin", 12 * MIB),
            })
            .unwrap();
        for (part_number, handle_id) in [(1, 42u64), (2, 43u64)] {
            upload
                .transition_part(&UploadPartEvent::Queued { part_number })
                .unwrap();
            upload
                .transition_part(&UploadPartEvent::Started {
                    part_number,
                    handle_id,
                })
                .unwrap();
        }
        upload
            .transition_part(&UploadPartEvent::Completed {
                part_number: 1,
                etag: "etag-1".into(),
            })
            .unwrap();
        upload
            .transition_part(&UploadPartEvent::Progress {
                part_number: 2,
                bytes_transferred: 2 * MIB,
            })
            .unwrap();
        parent.set_multipart(upload);

        // The in-flight part also has its own persisted record, the way
        // the session would have written it.
        let part_task = TransferTask::new(
            TransferKind::MultipartUploadPart {
                upload_id: upload_id.clone(),
                part_number: 2,
            },
            "my-bucket",
            "objects/archive.bin",
            TransferOptions::default(),
            db.as_store(),
        );
        part_task.set_upload_part(UploadPart::InProgress {
            bytes: 5 * MIB,
            bytes_transferred: 2 * MIB,
            handle_id: 43,
        });

        parent.transfer_id().clone()
    }

    #[tokio::test]
    async fn multipart_state_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let upload_id: UploadId = "upload-persisted".into();
        let parent_id = seed_interrupted_upload(dir.path(), &upload_id);

        // A fresh database over the same directory, as after a restart.
        let db = TransferDatabase::new(dir.path()).unwrap();
        let lister = StubLister { handles: vec![43] };
        let recovered = db.recover(&lister).await.unwrap();

        // The parent plus the still-live part task come back.
        assert_eq!(recovered.len(), 2);
        let parent = recovered
            .iter()
            .find(|pair| pair.task.transfer_id() == &parent_id)
            .expect("parent task recovered");
        let part = recovered
            .iter()
            .find(|pair| pair.task.part_number() == Some(2))
            .expect("part task recovered");

        assert_eq!(part.task.upload_id(), Some(upload_id.clone()));
        assert_eq!(part.task.handle_id(), Some(43));
        assert_eq!(part.task.status(), TransferStatus::Paused);

        // The aggregate reassembles with identical boundaries and
        // per-part status.
        let aggregates = &parent.multipart_uploads;
        assert_eq!(aggregates.len(), 1);
        let aggregate = &aggregates[0];
        assert_eq!(
            aggregate.upload_id().map(String::as_str),
            Some("upload-persisted")
        );
        assert_eq!(aggregate.part_size().unwrap().bytes(), 5 * MIB);

        let parts = aggregate.parts().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(UploadPart::bytes).collect::<Vec<_>>(),
            vec![5 * MIB, 5 * MIB, 2 * MIB]
        );
        assert!(parts.find(1).unwrap().is_completed());
        assert_eq!(parts.find(1).unwrap().etag(), Some("etag-1"));
        assert!(parts.find(2).unwrap().is_in_progress());
        assert_eq!(parts.find(2).unwrap().handle_id(), Some(43));
        assert_eq!(parts.find(2).unwrap().bytes_transferred(), 2 * MIB);
        assert!(parts.find(3).unwrap().is_pending());
    }

    #[tokio::test]
    async fn recovery_is_deterministic_across_databases() {
        let dir = tempfile::tempdir().unwrap();
        let upload_id: UploadId = "upload-deterministic".into();
        seed_interrupted_upload(dir.path(), &upload_id);

        // Two independent recoveries over copies of the same directory
        // derive identical part boundaries.
        let other = tempfile::tempdir().unwrap();
        for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
            std::fs::copy(entry.path(), other.path().join(entry.file_name())).unwrap();
        }

        let mut boundaries = Vec::new();
        for path in [dir.path(), other.path()] {
            let db = TransferDatabase::new(path).unwrap();
            let lister = StubLister { handles: vec![43] };
            let recovered = db.recover(&lister).await.unwrap();
            let aggregate = recovered
                .iter()
                .flat_map(|pair| pair.multipart_uploads.iter())
                .next()
                .expect("aggregate recovered");
            boundaries.push((
                aggregate.part_size().unwrap().bytes(),
                aggregate
                    .parts()
                    .unwrap()
                    .iter()
                    .map(UploadPart::bytes)
                    .collect::<Vec<_>>(),
            ));
        }
        assert_eq!(boundaries[0], boundaries[1]);
    }

    /// Client that finishes any dispatched part immediately.
    struct AutoClient {
        next_handle: AtomicU64,
        uploaded_parts: Mutex<Vec<PartNumber>>,
        complete_count: AtomicUsize,
    }

    impl AutoClient {
        fn new() -> Self {
            Self {
                next_handle: AtomicU64::new(1000),
                uploaded_parts: Mutex::new(Vec::new()),
                complete_count: AtomicUsize::new(0),
            }
        }
    }

    impl MultipartUploadClient for AutoClient {
        fn create_upload(
            &self,
            session: Arc<MultipartUploadSession>,
        ) -> Result<(), barge_engine::TransferError> {
            let file = session.upload_file();
            session.handle_upload_event(MultipartUploadEvent::Created {
                upload_id: "upload-live".into(),
                file,
            });
            Ok(())
        }

        fn upload_part(
            &self,
            session: Arc<MultipartUploadSession>,
            request: PartUploadRequest,
            _sub_task: Arc<TransferTask>,
        ) -> Result<(), barge_engine::TransferError> {
            self.uploaded_parts.lock().unwrap().push(request.part_number);
            let handle_id = self.next_handle.fetch_add(1, Ordering::SeqCst);
            session.handle_part_event(UploadPartEvent::Started {
                part_number: request.part_number,
                handle_id,
            });
            session.handle_part_event(UploadPartEvent::Completed {
                part_number: request.part_number,
                etag: format!("etag-{}", request.part_number),
            });
            Ok(())
        }

        fn complete_upload(
            &self,
            session: Arc<MultipartUploadSession>,
            _upload_id: &UploadId,
        ) -> Result<(), barge_engine::TransferError> {
            self.complete_count.fetch_add(1, Ordering::SeqCst);
            session.handle_upload_event(MultipartUploadEvent::Completed);
            Ok(())
        }

        fn abort_upload(
            &self,
            session: Arc<MultipartUploadSession>,
            _upload_id: &UploadId,
        ) -> Result<(), barge_engine::TransferError> {
            session.handle_upload_event(MultipartUploadEvent::Aborted);
            Ok(())
        }

        fn cancel_part_uploads(&self, _handle_ids: &[HandleId]) {}
    }

    #[tokio::test]
    async fn recovered_upload_resumes_and_completes() {
        let dir = tempfile::tempdir().unwrap();
        let upload_id: UploadId = "upload-resume".into();
        seed_interrupted_upload(dir.path(), &upload_id);

        let db = TransferDatabase::new(dir.path()).unwrap();
        // No transport handles survived, so part 2 rewinds to pending.
        let lister = StubLister { handles: vec![] };
        let recovered = db.recover(&lister).await.unwrap();

        let parent = recovered
            .iter()
            .find(|pair| pair.task.part_number().is_none())
            .expect("parent recovered");
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        // Re-attach a live callback the way the hosting app would.
        let task = TransferTask::with_id(
            parent.task.transfer_id().clone(),
            TransferKind::MultipartUpload {
                on_event: Arc::new(move |event: TransferEvent<()>| {
                    let name = match event {
                        TransferEvent::Initiated { .. } => "initiated",
                        TransferEvent::InProcess(_) => "in_process",
                        TransferEvent::Completed(()) => "completed",
                        TransferEvent::Failed(_) => "failed",
                    };
                    sink.lock().unwrap().push(name.to_string());
                }),
            },
            "my-bucket",
            "objects/archive.bin",
            TransferOptions::default(),
            db.as_store(),
        );

        let client = Arc::new(AutoClient::new());
        let aggregate = parent.multipart_uploads[0].clone();
        let session = MultipartUploadSession::from_recovered(
            Arc::clone(&client) as Arc<dyn MultipartUploadClient>,
            task,
            aggregate,
        )
        .unwrap();

        session.resume();

        assert!(session.is_completed());
        assert_eq!(client.complete_count.load(Ordering::SeqCst), 1);
        // Only the unfinished parts were re-uploaded.
        let mut uploaded = client.uploaded_parts.lock().unwrap().clone();
        uploaded.sort_unstable();
        assert_eq!(uploaded, vec![2, 3]);
        assert!(events.lock().unwrap().contains(&"completed".to_string()));
    }

    #[tokio::test]
    async fn simple_transfers_round_trip_through_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let ids: HashMap<&str, String>;
        {
            let db = TransferDatabase::new(dir.path()).unwrap();
            let download = TransferTask::new(
                TransferKind::Download {
                    on_event: Arc::new(|_| {}),
                },
                "my-bucket",
                "objects/pull.bin",
                TransferOptions {
                    location: Some("/tmp/pull.bin".into()),
                    ..TransferOptions::default()
                },
                db.as_store(),
            );
            download.set_handle(Arc::new(StubHandle(7)) as Arc<dyn TransportHandle>);
            let upload = TransferTask::new(
                TransferKind::Upload {
                    on_event: Arc::new(|_| {}),
                },
                "my-bucket",
                "objects/push.bin",
                TransferOptions::default(),
                db.as_store(),
            );
            upload.set_handle(Arc::new(StubHandle(8)) as Arc<dyn TransportHandle>);
            for task in [&download, &upload] {
                db.insert(task).unwrap();
            }
            ids = HashMap::from([
                ("download", download.transfer_id().clone()),
                ("upload", upload.transfer_id().clone()),
            ]);
        }

        let db = TransferDatabase::new(dir.path()).unwrap();
        let lister = StubLister {
            handles: vec![7, 8],
        };
        let recovered = db.recover(&lister).await.unwrap();
        assert_eq!(recovered.len(), 2);

        let download = recovered
            .iter()
            .find(|pair| pair.task.transfer_id() == &ids["download"])
            .expect("download recovered");
        assert_eq!(download.task.handle_id(), Some(7));
        assert_eq!(download.task.status(), TransferStatus::Paused);
        assert_eq!(download.task.bucket(), "my-bucket");
        assert_eq!(download.task.key(), "objects/pull.bin");

        // A recovered task resumes through its re-linked handle.
        download.task.resume();
        assert_eq!(download.task.status(), TransferStatus::InProgress);
    }
}
