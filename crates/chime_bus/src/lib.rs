//! chime_bus - 进程内事件总线
//!
//! 发布者只管 `publish`，订阅者在订阅时用 [`ThreadMode`] 选择投递线程：
//!
//! - [`ThreadMode::Ui`]：事件进入 UI 队列，由 UI 主循环调用 [`EventBus::dispatch_ui`] 排空；
//!   若发布者本身就在 UI 线程上，则同步投递。
//! - [`ThreadMode::Background`]：事件交给总线自带的后台线程串行投递；
//!   若发布者本身就是该后台线程，则同步投递。
//!
//! 同一线程发布的事件对每个订阅者按发布顺序到达。处理函数返回错误或 panic
//! 只会记录日志，不影响总线和其他订阅者。

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

/// 总线错误
#[derive(thiserror::Error, Debug)]
pub enum BusError {
    #[error("Failed to spawn background worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// 订阅者处理失败
#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<&str> for HandlerError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

pub type HandlerResult = Result<(), HandlerError>;

/// 投递线程
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadMode {
    /// UI 线程
    Ui,
    /// 总线后台线程
    Background,
}

/// 订阅 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 事件订阅者
///
/// 闭包 `Fn(&E) -> HandlerResult` 自动实现该 trait。
pub trait Subscriber<E>: Send + Sync {
    fn on_event(&self, event: &E) -> HandlerResult;
}

impl<E, F> Subscriber<E> for F
where
    F: Fn(&E) -> HandlerResult + Send + Sync,
{
    fn on_event(&self, event: &E) -> HandlerResult {
        self(event)
    }
}

struct Entry<E> {
    id: SubscriberId,
    /// 以 Arc 指针地址作为订阅者身份
    key: usize,
    mode: ThreadMode,
    handler: Arc<dyn Subscriber<E>>,
    active: AtomicBool,
}

struct Delivery<E> {
    entry: Arc<Entry<E>>,
    event: Arc<E>,
}

struct Background<E> {
    tx: Sender<Delivery<E>>,
    thread_id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

/// 事件总线
pub struct EventBus<E> {
    next_id: AtomicU64,
    entries: RwLock<Vec<Arc<Entry<E>>>>,
    ui_tx: Sender<Delivery<E>>,
    ui_rx: Receiver<Delivery<E>>,
    ui_thread: Mutex<Option<ThreadId>>,
    background: Mutex<Option<Background<E>>>,
}

fn handler_key<E>(handler: &Arc<dyn Subscriber<E>>) -> usize {
    Arc::as_ptr(handler) as *const () as usize
}

fn deliver<E>(entry: &Entry<E>, event: &E) {
    if !entry.active.load(Ordering::Acquire) {
        return;
    }

    match catch_unwind(AssertUnwindSafe(|| entry.handler.on_event(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => log::warn!("Subscriber {} failed: {}", entry.id, e),
        Err(_) => log::error!("Subscriber {} panicked while handling an event", entry.id),
    }
}

impl<E: Send + Sync + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + Sync + 'static> EventBus<E> {
    /// 创建总线（后台线程在第一个后台订阅者出现时才启动）
    pub fn new() -> Self {
        let (ui_tx, ui_rx) = unbounded();
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
            ui_tx,
            ui_rx,
            ui_thread: Mutex::new(None),
            background: Mutex::new(None),
        }
    }

    /// 订阅；同一个 handler 重复订阅返回原有 ID
    pub fn subscribe(
        &self,
        handler: Arc<dyn Subscriber<E>>,
        mode: ThreadMode,
    ) -> Result<SubscriberId, BusError> {
        let key = handler_key(&handler);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = entries.iter().find(|e| e.key == key) {
            log::debug!("Subscriber {} already registered", existing.id);
            return Ok(existing.id);
        }

        if mode == ThreadMode::Background {
            self.ensure_background()?;
        }

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        entries.push(Arc::new(Entry {
            id,
            key,
            mode,
            handler,
            active: AtomicBool::new(true),
        }));

        log::debug!("Subscriber {} registered ({:?})", id, mode);
        Ok(id)
    }

    /// 以闭包订阅
    pub fn subscribe_fn<F>(&self, handler: F, mode: ThreadMode) -> Result<SubscriberId, BusError>
    where
        F: Fn(&E) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(handler), mode)
    }

    /// 取消订阅；返回是否确实移除了订阅
    pub fn unsubscribe(&self, handler: &Arc<dyn Subscriber<E>>) -> bool {
        let key = handler_key(handler);
        self.remove_where(|e| e.key == key)
    }

    /// 按 ID 取消订阅
    pub fn unsubscribe_id(&self, id: SubscriberId) -> bool {
        self.remove_where(|e| e.id == id)
    }

    fn remove_where(&self, pred: impl Fn(&Entry<E>) -> bool) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(pos) = entries.iter().position(|e| pred(e.as_ref())) else {
            return false;
        };

        let entry = entries.remove(pos);
        // 队列中尚未投递的事件会被跳过
        entry.active.store(false, Ordering::Release);
        log::debug!("Subscriber {} removed", entry.id);
        true
    }

    pub fn subscriber_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 发布事件（不阻塞）
    pub fn publish(&self, event: E) {
        let entries: Vec<Arc<Entry<E>>> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if entries.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let current = thread::current().id();
        let on_ui_thread = self.is_ui_thread(current);
        let background = self.background_route();

        for entry in entries {
            match entry.mode {
                ThreadMode::Ui if on_ui_thread => deliver(&entry, &event),
                ThreadMode::Ui => {
                    // 接收端由总线自己持有，发送不会失败
                    let _ = self.ui_tx.send(Delivery {
                        entry,
                        event: Arc::clone(&event),
                    });
                }
                ThreadMode::Background => match &background {
                    Some((_, worker)) if *worker == current => deliver(&entry, &event),
                    Some((tx, _)) => {
                        let delivery = Delivery {
                            entry,
                            event: Arc::clone(&event),
                        };
                        if tx.send(delivery).is_err() {
                            log::warn!("Background worker is gone, event dropped");
                        }
                    }
                    None => log::warn!("No background worker for subscriber {}", entry.id),
                },
            }
        }
    }

    /// 将调用线程登记为 UI 线程
    pub fn attach_ui_thread(&self) {
        let mut ui_thread = self.ui_thread.lock().unwrap_or_else(PoisonError::into_inner);
        *ui_thread = Some(thread::current().id());
    }

    /// 在 UI 线程上投递所有待处理事件，返回投递数量
    pub fn dispatch_ui(&self) -> usize {
        let mut count = 0;
        while let Ok(delivery) = self.ui_rx.try_recv() {
            deliver(&delivery.entry, &delivery.event);
            count += 1;
        }
        count
    }

    /// 最多等待 `timeout` 直到有 UI 事件，然后全部投递
    pub fn wait_ui(&self, timeout: Duration) -> usize {
        match self.ui_rx.recv_timeout(timeout) {
            Ok(delivery) => {
                deliver(&delivery.entry, &delivery.event);
                1 + self.dispatch_ui()
            }
            Err(_) => 0,
        }
    }

    fn is_ui_thread(&self, current: ThreadId) -> bool {
        let ui_thread = self.ui_thread.lock().unwrap_or_else(PoisonError::into_inner);
        *ui_thread == Some(current)
    }

    fn background_route(&self) -> Option<(Sender<Delivery<E>>, ThreadId)> {
        let background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        background.as_ref().map(|bg| (bg.tx.clone(), bg.thread_id))
    }

    fn ensure_background(&self) -> Result<(), BusError> {
        let mut background = self.background.lock().unwrap_or_else(PoisonError::into_inner);
        if background.is_some() {
            return Ok(());
        }

        let (tx, rx) = unbounded::<Delivery<E>>();
        let handle = thread::Builder::new()
            .name("chime-bus-background".to_string())
            .spawn(move || {
                for delivery in rx.iter() {
                    deliver(&delivery.entry, &delivery.event);
                }
                log::debug!("Bus background worker exiting");
            })?;

        *background = Some(Background {
            tx,
            thread_id: handle.thread().id(),
            handle: Some(handle),
        });
        Ok(())
    }
}

impl<E> Drop for EventBus<E> {
    fn drop(&mut self) {
        let background = self
            .background
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(Background {
            tx,
            thread_id,
            handle,
        }) = background
        {
            // 关闭通道后后台线程排空队列即退出
            drop(tx);
            if thread::current().id() != thread_id {
                if let Some(handle) = handle {
                    let _ = handle.join();
                }
            }
        }
    }
}

// ============================================================================
// 测试
// ============================================================================
