use std::{cell::Cell, rc::Rc};

use strato_exceptions::WebError;
use strato_test::test_local;

use crate::{
    ByteStream, ByteView, QueuingStrategy, ReadableByteStreamController, ReadableStream,
    UnderlyingByteSource, UnderlyingSource,
};

fn ready() -> crate::SourceFuture {
    Box::pin(std::future::ready(Ok(())))
}

#[tokio::test]
async fn enqueue_two_chunks_then_close() {
    test_local(async {
        let stream = ReadableStream::new(
            UnderlyingSource::default().with_start(|controller| {
                controller.enqueue("a")?;
                controller.enqueue("b")?;
                controller.close()?;
                Ok(())
            }),
            QueuingStrategy::default(),
        )
        .unwrap();

        let reader = stream.get_reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some("a"));
        assert_eq!(reader.read().await.unwrap(), Some("b"));
        assert_eq!(reader.read().await.unwrap(), None);
        // closed() has settled by now
        reader.closed().await.unwrap();
    })
    .await;
}

#[tokio::test]
async fn locked_iff_reader_attached() {
    test_local(async {
        let stream = ReadableStream::<u32>::new(
            UnderlyingSource::default(),
            QueuingStrategy::default(),
        )
        .unwrap();

        assert!(!stream.locked());
        let reader = stream.get_reader().unwrap();
        assert!(stream.locked());

        // a second reader cannot be acquired while locked
        assert!(matches!(stream.get_reader(), Err(WebError::Type(_))));
        // nor can the stream itself be canceled
        assert!(matches!(
            stream.cancel(None).await,
            Err(WebError::Type(_))
        ));

        reader.release_lock();
        assert!(!stream.locked());
        stream.get_reader().unwrap();
    })
    .await;
}

#[tokio::test]
async fn zero_high_water_mark_pulls_on_demand_only() {
    test_local(async {
        let pulls = Rc::new(Cell::new(0u32));
        let stream = ReadableStream::new(
            UnderlyingSource::default().with_pull({
                let pulls = Rc::clone(&pulls);
                move |controller| {
                    pulls.set(pulls.get() + 1);
                    let n = pulls.get();
                    controller.enqueue(n).unwrap();
                    ready()
                }
            }),
            QueuingStrategy::with_high_water_mark(0.0),
        )
        .unwrap();

        tokio::task::yield_now().await;
        assert_eq!(pulls.get(), 0, "no demand, no pull");

        let reader = stream.get_reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some(1));
        assert_eq!(reader.read().await.unwrap(), Some(2));
        assert_eq!(reader.read().await.unwrap(), Some(3));
        tokio::task::yield_now().await;

        // one pull per dequeue, never more
        assert_eq!(pulls.get(), 3);
    })
    .await;
}

#[tokio::test]
async fn desired_size_tracks_queue_and_state() {
    test_local(async {
        let controller_slot: Rc<Cell<Option<crate::ReadableStreamDefaultController<&str>>>> =
            Rc::new(Cell::new(None));
        let stream = ReadableStream::new(
            UnderlyingSource::default().with_start({
                let slot = Rc::clone(&controller_slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }),
            QueuingStrategy::with_high_water_mark(10.0).with_size(|chunk: &&str| chunk.len() as f64),
        )
        .unwrap();

        let controller = controller_slot.take().unwrap();
        assert_eq!(controller.desired_size(), Some(10.0));
        controller.enqueue("abc").unwrap();
        assert_eq!(controller.desired_size(), Some(7.0));

        controller.close().unwrap();
        let reader = stream.get_reader().unwrap();
        assert_eq!(reader.read().await.unwrap(), Some("abc"));
        // closed: desired size is 0
        assert_eq!(controller.desired_size(), Some(0.0));
    })
    .await;
}

#[tokio::test]
async fn nan_size_errors_the_stream_with_range_error() {
    test_local(async {
        let controller_slot: Rc<Cell<Option<crate::ReadableStreamDefaultController<u8>>>> =
            Rc::new(Cell::new(None));
        let stream = ReadableStream::new(
            UnderlyingSource::default().with_start({
                let slot = Rc::clone(&controller_slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }),
            QueuingStrategy::with_high_water_mark(1.0).with_size(|_: &u8| f64::NAN),
        )
        .unwrap();

        let controller = controller_slot.take().unwrap();
        let err = controller.enqueue(1).unwrap_err();
        assert!(matches!(err, WebError::Range(_)));
        // sizing failure errored the stream
        assert!(stream.is_errored());
        assert_eq!(controller.desired_size(), None);
    })
    .await;
}

#[tokio::test]
async fn start_error_transitions_to_errored() {
    test_local(async {
        let stream = ReadableStream::<u8>::new(
            UnderlyingSource::default()
                .with_start(|_| Err(WebError::type_error("start failed"))),
            QueuingStrategy::default(),
        )
        .unwrap();

        let reader = stream.get_reader().unwrap();
        assert_eq!(
            reader.read().await.unwrap_err(),
            WebError::type_error("start failed")
        );
        assert_eq!(
            reader.closed().await.unwrap_err(),
            WebError::type_error("start failed")
        );
    })
    .await;
}

#[tokio::test]
async fn rejected_pull_errors_pending_reads() {
    test_local(async {
        let stream = ReadableStream::<u8>::new(
            UnderlyingSource::default().with_pull(|_| {
                Box::pin(std::future::ready(Err(WebError::type_error("pull broke"))))
            }),
            QueuingStrategy::with_high_water_mark(0.0),
        )
        .unwrap();

        let reader = stream.get_reader().unwrap();
        assert_eq!(
            reader.read().await.unwrap_err(),
            WebError::type_error("pull broke")
        );
    })
    .await;
}

#[tokio::test]
async fn cancel_runs_cancel_algorithm_once_and_is_idempotent() {
    test_local(async {
        let cancels = Rc::new(Cell::new(0u32));
        let seen_reason: Rc<Cell<Option<WebError>>> = Rc::new(Cell::new(None));
        let stream = ReadableStream::<u8>::new(
            UnderlyingSource::default().with_cancel({
                let cancels = Rc::clone(&cancels);
                let seen_reason = Rc::clone(&seen_reason);
                move |reason| {
                    cancels.set(cancels.get() + 1);
                    seen_reason.set(reason);
                    Box::pin(std::future::ready(Ok(())))
                }
            }),
            QueuingStrategy::default(),
        )
        .unwrap();

        stream
            .cancel(Some(WebError::type_error("done with it")))
            .await
            .unwrap();
        assert!(stream.is_disturbed());
        assert_eq!(cancels.get(), 1);
        assert_eq!(
            seen_reason.take(),
            Some(WebError::type_error("done with it"))
        );

        // cancel on a closed stream resolves immediately, no second run
        stream.cancel(None).await.unwrap();
        assert_eq!(cancels.get(), 1);
    })
    .await;
}

#[tokio::test]
async fn read_requests_are_fifo() {
    test_local(async {
        let controller_slot: Rc<Cell<Option<crate::ReadableStreamDefaultController<&str>>>> =
            Rc::new(Cell::new(None));
        let stream = ReadableStream::new(
            UnderlyingSource::default().with_start({
                let slot = Rc::clone(&controller_slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }),
            QueuingStrategy::with_high_water_mark(0.0),
        )
        .unwrap();
        let controller = controller_slot.take().unwrap();

        let reader = Rc::new(stream.get_reader().unwrap());
        let first = tokio::task::spawn_local({
            let reader = Rc::clone(&reader);
            async move { reader.read().await }
        });
        let second = tokio::task::spawn_local({
            let reader = Rc::clone(&reader);
            async move { reader.read().await }
        });
        tokio::task::yield_now().await;

        controller.enqueue("x").unwrap();
        controller.enqueue("y").unwrap();

        assert_eq!(first.await.unwrap().unwrap(), Some("x"));
        assert_eq!(second.await.unwrap().unwrap(), Some("y"));
    })
    .await;
}

#[tokio::test]
async fn released_reader_rejects_pending_and_future_reads() {
    test_local(async {
        let stream = ReadableStream::<u8>::new(
            UnderlyingSource::default(),
            QueuingStrategy::with_high_water_mark(0.0),
        )
        .unwrap();

        let reader = Rc::new(stream.get_reader().unwrap());
        let pending = tokio::task::spawn_local({
            let reader = Rc::clone(&reader);
            async move { reader.read().await }
        });
        tokio::task::yield_now().await;

        reader.release_lock();
        assert!(matches!(
            pending.await.unwrap().unwrap_err(),
            WebError::Type(_)
        ));
        assert!(matches!(reader.read().await.unwrap_err(), WebError::Type(_)));
        assert!(!stream.locked());
    })
    .await;
}

#[tokio::test]
async fn from_iter_adapts_an_iterator() {
    test_local(async {
        let stream = ReadableStream::from_iter(vec![1, 2, 3]);
        let mut values = stream.values();
        let mut collected = Vec::new();
        while let Some(value) = values.next().await.unwrap() {
            collected.push(value);
        }
        assert_eq!(collected, [1, 2, 3]);
    })
    .await;
}

#[tokio::test]
async fn iterator_finish_cancels_unless_prevented() {
    test_local(async {
        let cancels = Rc::new(Cell::new(0u32));
        let make_stream = |cancels: Rc<Cell<u32>>| {
            ReadableStream::<u8>::new(
                UnderlyingSource::default().with_cancel(move |_| {
                    cancels.set(cancels.get() + 1);
                    Box::pin(std::future::ready(Ok(())))
                }),
                QueuingStrategy::default(),
            )
            .unwrap()
        };

        let stream = make_stream(Rc::clone(&cancels));
        stream.values().finish(None).await.unwrap();
        assert_eq!(cancels.get(), 1);

        let stream = make_stream(Rc::clone(&cancels));
        stream.values_with_options(true).finish(None).await.unwrap();
        assert_eq!(cancels.get(), 1, "preventCancel skipped the cancel");
        assert!(!stream.locked());
    })
    .await;
}

mod byte_streams {
    use super::*;

    #[tokio::test]
    async fn byob_read_assembles_split_responses() {
        test_local(async {
            // Producer satisfies each pull through the BYOB request, three
            // bytes first, five bytes next.
            let round = Rc::new(Cell::new(0u8));
            let stream = ByteStream::bytes(
                UnderlyingByteSource::default()
                    .with_auto_allocate_chunk_size(8)
                    .with_pull({
                        let round = Rc::clone(&round);
                        move |controller: ReadableByteStreamController| {
                            let request = controller.byob_request().expect("pull implies demand");
                            round.set(round.get() + 1);
                            let n = round.get();
                            let result = match n {
                                1 => request
                                    .write_into(|dest| dest[..3].copy_from_slice(&[1, 2, 3]))
                                    .and_then(|_| request.respond(3)),
                                _ => request
                                    .write_into(|dest| {
                                        dest[..5].copy_from_slice(&[4, 5, 6, 7, 8])
                                    })
                                    .and_then(|_| request.respond(5)),
                            };
                            Box::pin(std::future::ready(result))
                        }
                    }),
            )
            .unwrap();

            let reader = stream.get_byob_reader().unwrap();
            let read = reader
                .read_with_min(ByteView::zeroed(8), 8)
                .await
                .unwrap();

            assert!(!read.done);
            let view = read.view.unwrap();
            assert_eq!(view.byte_length(), 8);
            assert_eq!(view.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
        })
        .await;
    }

    #[tokio::test]
    async fn default_reader_sees_enqueued_bytes() {
        test_local(async {
            let stream = ByteStream::bytes(UnderlyingByteSource::default().with_start(
                |controller: ReadableByteStreamController| {
                    controller.enqueue(ByteView::from(&b"abc"[..]))?;
                    controller.close()?;
                    Ok(())
                },
            ))
            .unwrap();

            let reader = stream.get_reader().unwrap();
            let view = reader.read().await.unwrap().unwrap();
            assert_eq!(view.as_slice(), b"abc");
            assert!(reader.read().await.unwrap().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn zero_length_enqueue_is_rejected() {
        test_local(async {
            let slot: Rc<Cell<Option<ReadableByteStreamController>>> = Rc::new(Cell::new(None));
            let _stream = ByteStream::bytes(UnderlyingByteSource::default().with_start({
                let slot = Rc::clone(&slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }))
            .unwrap();

            let controller = slot.take().unwrap();
            let err = controller.enqueue(ByteView::zeroed(0)).unwrap_err();
            assert!(matches!(err, WebError::Type(_)));
        })
        .await;
    }

    #[tokio::test]
    async fn respond_zero_only_when_closed() {
        test_local(async {
            let slot: Rc<Cell<Option<ReadableByteStreamController>>> = Rc::new(Cell::new(None));
            let stream = ByteStream::bytes(UnderlyingByteSource::default().with_start({
                let slot = Rc::clone(&slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }))
            .unwrap();
            let controller = slot.take().unwrap();

            let reader = stream.get_byob_reader().unwrap();
            let pending = tokio::task::spawn_local({
                async move { reader.read(ByteView::zeroed(4)).await }
            });
            tokio::task::yield_now().await;

            // readable: respond(0) is a TypeError
            let request = controller.byob_request().unwrap();
            assert!(matches!(request.respond(0), Err(WebError::Type(_))));

            // after close, respond(0) commits an empty view
            controller.close().unwrap();
            let request = controller.byob_request().unwrap();
            request.respond(0).unwrap();

            let read = pending.await.unwrap().unwrap();
            assert!(read.done);
            assert_eq!(read.view.unwrap().byte_length(), 0);
        })
        .await;
    }

    #[tokio::test]
    async fn partial_fill_survives_reader_release() {
        test_local(async {
            let slot: Rc<Cell<Option<ReadableByteStreamController>>> = Rc::new(Cell::new(None));
            let stream = ByteStream::bytes(UnderlyingByteSource::default().with_start({
                let slot = Rc::clone(&slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }))
            .unwrap();
            let controller = slot.take().unwrap();

            let byob = Rc::new(stream.get_byob_reader().unwrap());
            let pending = tokio::task::spawn_local({
                let byob = Rc::clone(&byob);
                async move { byob.read_with_min(ByteView::zeroed(4), 4).await }
            });
            tokio::task::yield_now().await;

            // two bytes land in the descriptor, not enough to commit
            let request = controller.byob_request().unwrap();
            request
                .write_into(|dest| dest[..2].copy_from_slice(b"hi"))
                .unwrap();
            request.respond(2).unwrap();

            // the reader goes away; its pending read rejects
            byob.release_lock();
            assert!(pending.await.unwrap().is_err());
            assert!(!stream.locked());

            // filled prefix plus the new chunk drain in order
            controller.enqueue(ByteView::from(&b"!"[..])).unwrap();
            let reader = stream.get_reader().unwrap();
            let first = reader.read().await.unwrap().unwrap();
            assert_eq!(first.as_slice(), b"hi");
            let second = reader.read().await.unwrap().unwrap();
            assert_eq!(second.as_slice(), b"!");
        })
        .await;
    }

    #[tokio::test]
    async fn byob_request_goes_stale_when_descriptor_advances() {
        test_local(async {
            let slot: Rc<Cell<Option<ReadableByteStreamController>>> = Rc::new(Cell::new(None));
            let stream = ByteStream::bytes(UnderlyingByteSource::default().with_start({
                let slot = Rc::clone(&slot);
                move |controller| {
                    slot.set(Some(controller));
                    Ok(())
                }
            }))
            .unwrap();
            let controller = slot.take().unwrap();

            let reader = stream.get_byob_reader().unwrap();
            let pending = tokio::task::spawn_local({
                async move { reader.read(ByteView::zeroed(2)).await }
            });
            tokio::task::yield_now().await;

            let request = controller.byob_request().unwrap();
            request
                .write_into(|dest| dest.copy_from_slice(b"ok"))
                .unwrap();
            request.respond(2).unwrap();
            assert_eq!(pending.await.unwrap().unwrap().view.unwrap().as_slice(), b"ok");

            // the old handle is no longer connected to anything
            assert!(matches!(request.respond(1), Err(WebError::Type(_))));
            assert!(controller.byob_request().is_none());
        })
        .await;
    }

    #[tokio::test]
    async fn byob_reader_rejected_for_default_streams() {
        test_local(async {
            let stream = ReadableStream::<ByteView>::new(
                UnderlyingSource::default(),
                QueuingStrategy::default(),
            )
            .unwrap();
            assert!(matches!(
                stream.get_byob_reader(),
                Err(WebError::Type(_))
            ));
        })
        .await;
    }
}
