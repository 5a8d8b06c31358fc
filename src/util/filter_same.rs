use futures::future;
use futures::{stream::BoxStream, StreamExt};

impl<T: ?Sized> FilterSameExt for T
where
    T: StreamExt,
    T::Item: Clone + PartialEq,
{
}

pub trait FilterSameExt: StreamExt {
    /// Drops every item equal to the one emitted before it.
    fn filter_same<'a>(self) -> BoxStream<'a, Self::Item>
    where
        Self::Item: 'a + Clone + PartialEq + Send,
        Self: 'a + Sized + Send,
    {
        let mut last: Option<Self::Item> = None;
        self.filter_map(move |item| {
            let out = if last.as_ref() == Some(&item) {
                None
            } else {
                last = Some(item.clone());
                Some(item)
            };
            future::ready(out)
        })
        .boxed()
    }

    /// Like `filter_same`, but the first item only sets the baseline and is
    /// not emitted.
    fn changes<'a>(self) -> BoxStream<'a, Self::Item>
    where
        Self::Item: 'a + Clone + PartialEq + Send,
        Self: 'a + Sized + Send,
    {
        self.filter_same().skip(1).boxed()
    }
}
