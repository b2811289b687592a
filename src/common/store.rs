//! リクエスト単位のキー/値ストア（ミドルウェア間でのデータ共有）

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// ストアに格納される値
pub type StoreValue = Arc<dyn Any + Send + Sync>;

/// リクエストスコープのキー/値ストア
#[derive(Default, Clone)]
pub struct Store {
    values: HashMap<String, StoreValue>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// 型付きの値を設定
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.values.insert(key.to_string(), Arc::new(value));
    }

    /// 共有済みの値をそのまま設定
    pub fn set_shared(&mut self, key: &str, value: StoreValue) {
        self.values.insert(key.to_string(), value);
    }

    /// 値を型消去されたまま取得
    pub fn get_shared(&self, key: &str) -> Option<StoreValue> {
        self.values.get(key).cloned()
    }

    /// 値を型付きで取得
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.values
            .get(key)
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn remove(&mut self, key: &str) -> Option<StoreValue> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.values.keys().collect::<Vec<_>>())
            .finish()
    }
}
