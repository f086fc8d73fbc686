//! Bounded game queue between the self-play workers and the trainer.
//!
//! Many producers, one consumer. Producers block once `capacity` games are
//! in flight, which is the back-pressure that throttles self-play when
//! training lags behind.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TryRecvError};

use crate::data::record::TrajectoryRecord;
use crate::{Error, Result};

#[derive(Clone)]
pub struct TrajectorySender {
    inner: SyncSender<Vec<TrajectoryRecord>>,
}

pub struct TrajectoryReceiver {
    inner: Receiver<Vec<TrajectoryRecord>>,
}

pub fn trajectory_channel(capacity: usize) -> (TrajectorySender, TrajectoryReceiver) {
    let (sender, receiver) = sync_channel(capacity);
    (
        TrajectorySender { inner: sender },
        TrajectoryReceiver { inner: receiver },
    )
}

impl TrajectorySender {
    /// Queue one finished game; blocks while the buffer is full.
    pub fn send(&self, game: Vec<TrajectoryRecord>) -> Result<()> {
        self.inner.send(game).map_err(|_| Error::ChannelClosed)
    }
}

impl TrajectoryReceiver {
    /// Take the next game, blocking while the buffer is empty.
    pub fn recv(&self) -> Result<Vec<TrajectoryRecord>> {
        self.inner.recv().map_err(|_| Error::ChannelClosed)
    }

    /// Take a game only if one is already queued.
    pub fn try_recv(&self) -> Result<Option<Vec<TrajectoryRecord>>> {
        match self.inner.try_recv() {
            Ok(game) => Ok(Some(game)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::ChannelClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::Chessboard;
    use std::thread;
    use std::time::Duration;

    fn game(v: f32) -> Vec<TrajectoryRecord> {
        vec![TrajectoryRecord {
            chessboard: Chessboard::empty(),
            pi: vec![0.0; crate::NUM_CELLS],
            v,
        }]
    }

    #[test]
    fn games_arrive_in_order_across_threads() {
        let (sender, receiver) = trajectory_channel(1);
        let producer = thread::spawn(move || {
            for i in 0..3 {
                sender.send(game(i as f32)).unwrap();
            }
        });
        for i in 0..3 {
            let received = receiver.recv().unwrap();
            assert_eq!(received[0].v, i as f32);
        }
        producer.join().unwrap();
    }

    #[test]
    fn full_buffer_blocks_the_producer() {
        let (sender, receiver) = trajectory_channel(1);
        sender.send(game(0.0)).unwrap();

        let blocked = thread::spawn(move || {
            sender.send(game(1.0)).unwrap();
        });
        // the second send cannot complete until the consumer drains one game
        thread::sleep(Duration::from_millis(50));
        assert!(!blocked.is_finished());

        assert_eq!(receiver.recv().unwrap()[0].v, 0.0);
        blocked.join().unwrap();
        assert_eq!(receiver.recv().unwrap()[0].v, 1.0);
    }

    #[test]
    fn dropped_consumer_surfaces_as_channel_closed() {
        let (sender, receiver) = trajectory_channel(4);
        drop(receiver);
        assert!(matches!(sender.send(game(0.0)), Err(Error::ChannelClosed)));
    }

    #[test]
    fn try_recv_does_not_block() {
        let (sender, receiver) = trajectory_channel(2);
        assert!(receiver.try_recv().unwrap().is_none());
        sender.send(game(2.0)).unwrap();
        assert_eq!(receiver.try_recv().unwrap().unwrap()[0].v, 2.0);
    }
}
