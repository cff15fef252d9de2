//! Неограниченная очередь со счётчиком глубины.
//!
//! Брокер не применяет backpressure, но должен видеть глубину очередей
//! модулей, которые читаются в чужих задачах. Счётчик разделяется между
//! отправителем и получателем.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::mpsc::{self, error::SendError};

pub struct CountedSender<T> {
    tx: mpsc::UnboundedSender<T>,
    depth: Arc<AtomicUsize>,
}

pub struct CountedReceiver<T> {
    rx: mpsc::UnboundedReceiver<T>,
    depth: Arc<AtomicUsize>,
}

pub fn counted_channel<T>() -> (CountedSender<T>, CountedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        CountedSender {
            tx,
            depth: depth.clone(),
        },
        CountedReceiver { rx, depth },
    )
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<T> CountedSender<T> {
    /// Неблокирующая отправка; ошибка только если получатель закрыт.
    pub fn send(
        &self,
        value: T,
    ) -> Result<(), SendError<T>> {
        // счётчик увеличивается до отправки, иначе получатель может уйти в минус
        self.depth.fetch_add(1, Ordering::AcqRel);
        self.tx.send(value).inspect_err(|_| {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        })
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl<T> CountedReceiver<T> {
    pub async fn recv(&mut self) -> Option<T> {
        let value = self.rx.recv().await?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    pub fn try_recv(&mut self) -> Option<T> {
        let value = self.rx.try_recv().ok()?;
        self.depth.fetch_sub(1, Ordering::AcqRel);
        Some(value)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    pub fn close(&mut self) {
        self.rx.close();
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов
////////////////////////////////////////////////////////////////////////////////

impl<T> Clone for CountedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            depth: self.depth.clone(),
        }
    }
}

impl<T> std::fmt::Debug for CountedSender<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CountedSender")
            .field("depth", &self.depth())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_depth_tracks_send_and_recv() {
        let (tx, mut rx) = counted_channel();
        tx.send(1).unwrap();
        tx.send(2).unwrap();
        assert_eq!(tx.depth(), 2);
        assert_eq!(rx.depth(), 2);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(tx.depth(), 1);
        assert_eq!(rx.try_recv(), Some(2));
        assert_eq!(rx.depth(), 0);
        assert_eq!(rx.try_recv(), None);
    }

    /// Тест проверяет, что отправка в закрытую очередь не портит счётчик.
    #[tokio::test]
    async fn test_send_to_closed_keeps_depth() {
        let (tx, rx) = counted_channel();
        drop(rx);
        assert!(tx.is_closed());
        assert!(tx.send("lost").is_err());
        assert_eq!(tx.depth(), 0);
    }

    #[tokio::test]
    async fn test_recv_none_after_all_senders_dropped() {
        let (tx, mut rx) = counted_channel::<u8>();
        let tx2 = tx.clone();
        drop(tx);
        drop(tx2);
        assert_eq!(rx.recv().await, None);
    }
}
