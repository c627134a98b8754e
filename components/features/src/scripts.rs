//! Scripts evaluated inside monitored targets
//!
//! Each script returns a small JSON object describing what it did so the
//! calling feature can account for freed memory.

/// Drop caches the page owns and ask for a collection when exposed
pub const CLEANUP_SCRIPT: &str = r#"(() => {
  let freedBytes = 0;
  if (window.caches && window.caches.keys) {
    window.caches.keys().then(keys => keys.forEach(k => window.caches.delete(k)));
  }
  if (window.__memoryCaches) {
    for (const cache of window.__memoryCaches) {
      freedBytes += cache.size || 0;
      cache.clear && cache.clear();
    }
  }
  if (typeof window.gc === 'function') window.gc();
  return { freedBytes };
})()"#;

/// Lazy-load offscreen images and drop hidden nodes marked as disposable
pub const DOM_OPTIMIZATION_SCRIPT: &str = r#"((lazyImages) => {
  let lazyLoaded = 0;
  let removedNodes = 0;
  if (lazyImages) {
    for (const img of document.querySelectorAll('img:not([loading])')) {
      img.loading = 'lazy';
      lazyLoaded++;
    }
  }
  for (const el of document.querySelectorAll('[data-disposable][hidden]')) {
    el.remove();
    removedNodes++;
  }
  return { lazyLoaded, removedNodes };
})"#;

/// Register every socket the page opens so it can be paused later
pub const SOCKET_TRACKING_SCRIPT: &str = r#"(() => {
  if (window.__trackedSockets) return { tracked: window.__trackedSockets.size };
  const sockets = new Set();
  const Native = window.WebSocket;
  window.WebSocket = function (...args) {
    const socket = new Native(...args);
    socket.__args = args;
    sockets.add(socket);
    socket.addEventListener('close', () => sockets.delete(socket));
    return socket;
  };
  window.WebSocket.prototype = Native.prototype;
  window.__trackedSockets = sockets;
  return { tracked: 0 };
})()"#;

/// Close tracked sockets, remembering how to reopen them
pub const SOCKET_PAUSE_SCRIPT: &str = r#"(() => {
  const sockets = window.__trackedSockets || new Set();
  window.__pausedSockets = [];
  for (const socket of sockets) {
    window.__pausedSockets.push(socket.__args);
    socket.close();
  }
  return { paused: window.__pausedSockets.length };
})()"#;

/// Reopen sockets closed by the pause script
pub const SOCKET_RECONNECT_SCRIPT: &str = r#"(() => {
  const paused = window.__pausedSockets || [];
  for (const args of paused) new window.WebSocket(...args);
  window.__pausedSockets = [];
  return { reconnected: paused.length };
})()"#;

/// Invocation of [`DOM_OPTIMIZATION_SCRIPT`] with its option applied
pub fn dom_optimization_call(lazy_images: bool) -> String {
    format!("{}({})", DOM_OPTIMIZATION_SCRIPT, lazy_images)
}
